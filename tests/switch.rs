//
// Learning and forwarding through a switch node.
//
use pnet::util::MacAddr;

use brickgraph::switch::Switch;
use brickgraph::{BrickConfig, Graph, Mask, NodeId, Packet, Side};

mod common;
use common::{bursts, collect, mac, packet, send, take};

struct Lan {
    graph: Graph,
    switch: NodeId,
    n1: NodeId,
    n2: NodeId,
    n3: NodeId,
}

// n1 and n2 sit on the west side of the switch (edges 0 and 1), n3 on its east side (edge 0).
fn lan() -> Lan {
    let mut graph = Graph::default();
    let switch = graph
        .create("switch", &BrickConfig::with_sides("switch", 4, 4))
        .unwrap();
    let n1 = collect(&mut graph, "n1");
    let n2 = collect(&mut graph, "n2");
    let n3 = collect(&mut graph, "n3");
    graph.link(n1, switch).unwrap();
    graph.link(n2, switch).unwrap();
    graph.link(switch, n3).unwrap();

    Lan {
        graph,
        switch,
        n1,
        n2,
        n3,
    }
}

impl Lan {
    fn received(&mut self) -> [usize; 3] {
        [
            take(&mut self.graph, self.n1, Side::East).len(),
            take(&mut self.graph, self.n2, Side::East).len(),
            take(&mut self.graph, self.n3, Side::West).len(),
        ]
    }

    fn lookup(&mut self, addr: MacAddr) -> Option<(Side, u16)> {
        self.graph
            .with_brick::<Switch, _, _>(self.switch, |s, _| Ok(s.lookup(addr)))
            .unwrap()
    }

    fn table_len(&mut self) -> usize {
        self.graph
            .with_brick::<Switch, _, _>(self.switch, |s, _| Ok(s.table_len()))
            .unwrap()
    }
}

fn broadcast() -> MacAddr {
    MacAddr::broadcast()
}

#[test]
fn unknown_destination_floods_without_echo() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(3), mac(1)));

    assert_eq!(lan.received(), [0, 1, 1]);
    assert_eq!(lan.lookup(mac(1)), Some((Side::West, 0)));
}

#[test]
fn reply_goes_to_learned_edge_only() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(3), mac(1)));
    lan.received();

    let reply = packet(mac(1), mac(3));
    let expected = reply.data().to_vec();
    send(&mut lan.graph, lan.switch, Side::East, 0, reply);

    let got = take(&mut lan.graph, lan.n1, Side::East);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].data(), &expected[..]);
    assert_eq!(lan.received(), [0, 0, 0]);

    // n3 is learned too now.
    send(&mut lan.graph, lan.switch, Side::West, 1, packet(mac(3), mac(2)));
    assert_eq!(lan.received(), [0, 0, 1]);
}

#[test]
fn broadcast_floods_every_time() {
    let mut lan = lan();

    for _ in 0..3 {
        send(&mut lan.graph, lan.switch, Side::East, 0, packet(broadcast(), mac(3)));
        assert_eq!(lan.received(), [1, 1, 0]);
    }
    assert_eq!(lan.table_len(), 1);
}

#[test]
fn reserved_destinations_are_dropped() {
    let mut lan = lan();
    let stp = MacAddr::new(0x01, 0x80, 0xc2, 0x00, 0x00, 0x00);
    let lldp = MacAddr::new(0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e);

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(stp, mac(1)));
    send(&mut lan.graph, lan.switch, Side::West, 0, packet(lldp, mac(1)));

    assert_eq!(lan.received(), [0, 0, 0]);
    // The source is still learned.
    assert_eq!(lan.lookup(mac(1)), Some((Side::West, 0)));
}

#[test]
fn multicast_sources_are_not_learned() {
    let mut lan = lan();
    let group = MacAddr::new(0x01, 0x00, 0x5e, 0x00, 0x00, 0x01);

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(3), group));

    assert_eq!(lan.table_len(), 0);
    assert_eq!(lan.received(), [0, 1, 1]);
}

#[test]
fn destination_behind_ingress_is_dropped() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(9), mac(1)));
    lan.received();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(1), mac(5)));
    assert_eq!(lan.received(), [0, 0, 0]);
}

#[test]
fn stale_entry_floods_after_relink() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(mac(3), mac(1)));
    lan.received();

    lan.graph.destroy(lan.n1).unwrap();
    assert_eq!(lan.lookup(mac(1)), None);

    // n4 takes over west edge 0.
    let n4 = collect(&mut lan.graph, "n4");
    lan.graph.link(n4, lan.switch).unwrap();
    assert_eq!(
        lan.graph.edge(lan.switch, Side::West, 0).map(|e| e.link),
        Some(n4)
    );

    send(&mut lan.graph, lan.switch, Side::East, 0, packet(mac(1), mac(3)));

    assert_eq!(take(&mut lan.graph, n4, Side::East).len(), 1);
    assert_eq!(take(&mut lan.graph, lan.n2, Side::East).len(), 1);
    assert_eq!(take(&mut lan.graph, lan.n3, Side::West).len(), 0);
}

#[test]
fn one_burst_per_edge() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 1, packet(broadcast(), mac(2)));
    send(&mut lan.graph, lan.switch, Side::East, 0, packet(broadcast(), mac(3)));
    lan.received();
    let n1_before = bursts(&mut lan.graph, lan.n1, Side::East);
    let n2_before = bursts(&mut lan.graph, lan.n2, Side::East);
    let n3_before = bursts(&mut lan.graph, lan.n3, Side::West);

    let mut pkts = vec![
        packet(mac(2), mac(1)),
        packet(mac(3), mac(1)),
        packet(mac(2), mac(1)),
        packet(broadcast(), mac(1)),
    ];
    lan.graph
        .burst(lan.switch, Side::West, 0, &mut pkts, Mask::first(4))
        .unwrap();

    let to_n2 = take(&mut lan.graph, lan.n2, Side::East);
    let to_n3 = take(&mut lan.graph, lan.n3, Side::West);
    assert_eq!(to_n2.len(), 3);
    assert_eq!(to_n3.len(), 2);
    assert_eq!(to_n2[0].data(), pkts[0].data());
    assert_eq!(to_n2[1].data(), pkts[2].data());
    assert_eq!(to_n2[2].data(), pkts[3].data());
    assert_eq!(to_n3[0].data(), pkts[1].data());
    assert_eq!(to_n3[1].data(), pkts[3].data());

    assert_eq!(bursts(&mut lan.graph, lan.n2, Side::East), n2_before + 1);
    assert_eq!(bursts(&mut lan.graph, lan.n3, Side::West), n3_before + 1);
    assert_eq!(bursts(&mut lan.graph, lan.n1, Side::East), n1_before);
}

#[test]
fn inactive_slots_are_ignored() {
    let mut lan = lan();

    let mut pkts: Vec<Packet> = vec![
        packet(mac(3), mac(1)),
        packet(mac(3), mac(2)),
        packet(mac(3), mac(4)),
    ];
    lan.graph
        .burst(lan.switch, Side::West, 0, &mut pkts, Mask::from_bits(0b101))
        .unwrap();

    let got = take(&mut lan.graph, lan.n3, Side::West);
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].data(), pkts[0].data());
    assert_eq!(got[1].data(), pkts[2].data());

    assert_eq!(lan.lookup(mac(1)), Some((Side::West, 0)));
    assert_eq!(lan.lookup(mac(2)), None);
    assert_eq!(lan.lookup(mac(4)), Some((Side::West, 0)));
}

#[test]
fn station_move_is_relearned() {
    let mut lan = lan();

    send(&mut lan.graph, lan.switch, Side::West, 0, packet(broadcast(), mac(7)));
    assert_eq!(lan.lookup(mac(7)), Some((Side::West, 0)));

    send(&mut lan.graph, lan.switch, Side::East, 0, packet(broadcast(), mac(7)));
    assert_eq!(lan.lookup(mac(7)), Some((Side::East, 0)));
    assert_eq!(lan.table_len(), 1);
}
