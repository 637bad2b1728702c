//
// Helpers shared by the integration tests: frame builders and graph fixtures.
//
#![allow(dead_code)]

use std::net::Ipv4Addr;

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;
use rand::Rng;

use brickgraph::collect::Collect;
use brickgraph::vtep::VtepOptions;
use brickgraph::{BrickConfig, Graph, Mask, NodeId, Packet, Side};

pub const PAYLOAD_LEN: usize = 46;

/// Locally administered unicast MAC ending in `n`.
pub fn mac(n: u8) -> MacAddr {
    MacAddr::new(0x52, 0x54, 0x00, 0x00, 0x00, n)
}

/// An Ethernet frame with a random payload.
pub fn frame(dst: MacAddr, src: MacAddr) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut buf = vec![0u8; 14 + PAYLOAD_LEN];

    {
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(dst);
        eth.set_source(src);
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    rng.fill(&mut buf[14..]);

    buf
}

pub fn packet(dst: MacAddr, src: MacAddr) -> Packet {
    Packet::new(&frame(dst, src))
}

pub fn collect(graph: &mut Graph, name: &str) -> NodeId {
    graph.create("collect", &BrickConfig::new(name)).unwrap()
}

/// Drain what the collect node `id` received on `side`.
pub fn take(graph: &mut Graph, id: NodeId, side: Side) -> Vec<Packet> {
    graph
        .with_brick::<Collect, _, _>(id, |c, _| Ok(c.take(side)))
        .unwrap()
}

pub fn bursts(graph: &mut Graph, id: NodeId, side: Side) -> u64 {
    graph
        .with_brick::<Collect, _, _>(id, |c, _| Ok(c.bursts(side)))
        .unwrap()
}

/// Burst a single packet into `id`.
pub fn send(graph: &mut Graph, id: NodeId, from: Side, edge: u16, pkt: Packet) {
    graph
        .burst(id, from, edge, &mut [pkt], Mask::first(1))
        .unwrap();
}

pub fn vtep(graph: &mut Graph, name: &str, ip: Ipv4Addr, mac: &str, tunnel: Side) -> NodeId {
    let mut options = VtepOptions::new(ip, mac);
    options.tunnel = tunnel;
    vtep_with(graph, name, &options)
}

pub fn vtep_with(graph: &mut Graph, name: &str, options: &VtepOptions) -> NodeId {
    let config = BrickConfig::with_sides(name, 8, 8)
        .with_options(options)
        .unwrap();
    graph.create("vtep", &config).unwrap()
}
