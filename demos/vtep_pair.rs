//
// Two VTEPs joined through a learning switch acting as the underlay. Frames are pushed between
// two collect nodes standing in for virtual machines and the per second totals are printed.
//
// vm_a -- vt_a -- underlay -- vt_b -- vm_b
//
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use brickgraph::collect::Collect;
use brickgraph::vtep::{self, VtepOptions};
use brickgraph::{BrickConfig, Graph, Mask, NodeId, Packet, Side, MAX_BURST};

#[derive(Default, Debug, Clone, Copy)]
struct Stats {
    a_to_b: usize,
    b_to_a: usize,
    errors: usize,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "vtep_pair")]
struct Opt {
    /// Batch size
    #[structopt(long, default_value = "64")]
    batch_size: usize,

    /// VNI shared by both VTEPs
    #[structopt(long, default_value = "42")]
    vni: u32,

    /// Multicast group for the VNI
    #[structopt(long, default_value = "239.1.1.1")]
    group: Ipv4Addr,

    /// How long to run, in seconds
    #[structopt(long, default_value = "5")]
    seconds: u64,

    /// Rewrite frames in place instead of encapsulating copies
    #[structopt(long)]
    no_copy: bool,
}

fn frame(dst: [u8; 6], src: [u8; 6]) -> Vec<u8> {
    let mut buf = vec![0u8; 64];
    buf[0..6].copy_from_slice(&dst);
    buf[6..12].copy_from_slice(&src);
    buf[12..14].copy_from_slice(&[0x08, 0x00]);
    buf
}

fn vtep(graph: &mut Graph, name: &str, options: &VtepOptions) -> NodeId {
    let config = BrickConfig::new(name).with_options(options);
    let r = config.and_then(|config| graph.create("vtep", &config));
    match r {
        Ok(id) => id,
        Err(err) => panic!("no vtep for you: {}", err),
    }
}

fn drain(graph: &mut Graph, id: NodeId, side: Side) -> usize {
    let r = graph.with_brick::<Collect, _, _>(id, |c, _| Ok(c.take(side).len()));
    match r {
        Ok(n) => n,
        Err(err) => panic!("error: {}", err),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::from_args();
    let batch_size = opt.batch_size.min(MAX_BURST);

    let mut options_a = VtepOptions::new(Ipv4Addr::new(10, 0, 0, 1), "02:00:00:00:00:0a");
    options_a.no_copy = opt.no_copy;
    let mut options_b = VtepOptions::new(Ipv4Addr::new(10, 0, 0, 2), "02:00:00:00:00:0b");
    options_b.tunnel = Side::West;
    options_b.no_copy = opt.no_copy;

    //
    // Topology
    //
    let mut graph = Graph::default();
    let vm_a = graph.create("collect", &BrickConfig::new("vm_a")).unwrap();
    let vt_a = vtep(&mut graph, "vt_a", &options_a);
    let underlay = graph.create("switch", &BrickConfig::new("underlay")).unwrap();
    let vt_b = vtep(&mut graph, "vt_b", &options_b);
    let vm_b = graph.create("collect", &BrickConfig::new("vm_b")).unwrap();

    graph.link(vm_a, vt_a).unwrap();
    graph.link(vt_a, underlay).unwrap();
    graph.link(underlay, vt_b).unwrap();
    graph.link(vt_b, vm_b).unwrap();

    vtep::add_vni(&mut graph, vt_a, vm_a, opt.vni, opt.group).unwrap();
    vtep::add_vni(&mut graph, vt_b, vm_b, opt.vni, opt.group).unwrap();

    let mac_a = [0x52, 0x54, 0, 0, 0, 1];
    let mac_b = [0x52, 0x54, 0, 0, 0, 2];

    // Announce both machines so each VTEP learns where the other one lives.
    let mut hello = [Packet::new(&frame([0xff; 6], mac_a))];
    graph.burst(vt_a, Side::West, 0, &mut hello, Mask::first(1)).unwrap();
    let mut hello = [Packet::new(&frame([0xff; 6], mac_b))];
    graph.burst(vt_b, Side::East, 0, &mut hello, Mask::first(1)).unwrap();
    drain(&mut graph, vm_a, Side::East);
    drain(&mut graph, vm_b, Side::West);

    let to_b = frame(mac_b, mac_a);
    let to_a = frame(mac_a, mac_b);

    //
    // The loop
    //
    let mut stats: Stats = Default::default();
    let start = Instant::now();
    let mut last = start;

    while start.elapsed() < Duration::from_secs(opt.seconds) {
        let now = Instant::now();
        if now.duration_since(last) > Duration::from_secs(1) {
            println!("{:?}", stats);
            last = now;
        }

        let mut pkts: Vec<Packet> = (0..batch_size).map(|_| Packet::new(&to_b)).collect();
        if graph
            .burst(vt_a, Side::West, 0, &mut pkts, Mask::first(batch_size))
            .is_err()
        {
            stats.errors += 1;
        }
        stats.a_to_b += drain(&mut graph, vm_b, Side::West);

        let mut pkts: Vec<Packet> = (0..batch_size).map(|_| Packet::new(&to_a)).collect();
        if graph
            .burst(vt_b, Side::East, 0, &mut pkts, Mask::first(batch_size))
            .is_err()
        {
            stats.errors += 1;
        }
        stats.b_to_a += drain(&mut graph, vm_a, Side::East);
    }

    println!("{:?}", stats);
    println!(
        "underlay: {} packets west, {} east",
        graph.packet_count(underlay, Side::West).unwrap_or(0),
        graph.packet_count(underlay, Side::East).unwrap_or(0)
    );
}
