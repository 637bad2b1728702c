use brickgraph::{BrickConfig, Graph, Mask, Packet, Side, MAX_BURST};

use criterion::{criterion_group, criterion_main, Criterion};

const HOSTS: u8 = 16;

fn frame(dst: u8, src: u8) -> Packet {
    let mut buf = [0u8; 60];
    buf[0..6].copy_from_slice(&[0x52, 0x54, 0, 0, 0, dst]);
    buf[6..12].copy_from_slice(&[0x52, 0x54, 0, 0, 0, src]);
    buf[12..14].copy_from_slice(&[0x08, 0x00]);
    Packet::new(&buf)
}

fn build() -> (Graph, brickgraph::NodeId) {
    let mut graph = Graph::default();
    let switch = graph
        .create("switch", &BrickConfig::with_sides("switch", 1, HOSTS as u32))
        .unwrap();
    let uplink = graph.create("nop", &BrickConfig::new("uplink")).unwrap();
    graph.link(uplink, switch).unwrap();

    for i in 0..HOSTS {
        let host = graph
            .create("nop", &BrickConfig::new(&format!("host{}", i)))
            .unwrap();
        graph.link(switch, host).unwrap();
        // Teach the switch where every host lives.
        graph
            .burst(switch, Side::East, i as u16, &mut [frame(0xff, i)], Mask::first(1))
            .unwrap();
    }

    (graph, switch)
}

fn test(c: &mut Criterion) {
    let (mut graph, switch) = build();

    let mut known: Vec<Packet> = (0..MAX_BURST).map(|i| frame(i as u8 % HOSTS, 0xf0)).collect();
    c.bench_function("switch_known_unicast", |b| {
        b.iter(|| graph.burst(switch, Side::West, 0, &mut known, Mask::FULL))
    });

    let mut unknown: Vec<Packet> = (0..MAX_BURST).map(|_| frame(0xee, 0xf0)).collect();
    c.bench_function("switch_flood", |b| {
        b.iter(|| graph.burst(switch, Side::West, 0, &mut unknown, Mask::FULL))
    });
}

criterion_group!(benches, test);
criterion_main!(benches);
