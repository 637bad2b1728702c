//! MAC learning switch.
//!
//! Every source address seen is remembered together with the edge it came from and that
//! edge's unlink generation. Unicast frames to a remembered address go out that edge alone as
//! long as the edge has not been unlinked since; everything else is flooded to every edge but
//! the ingress one. Link local protocol frames (01:80:C2:00:00:0X) are dropped.

use std::any::Any;
use std::collections::HashMap;

use pnet::util::MacAddr;
use tracing::trace;

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::Result;
use crate::headers::{self, MacKey};
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};

pub const BRICK_TYPE: BrickType = BrickType {
    name: "switch",
    capacity: CapacityClass::Multiple,
    init,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Entry {
    side: Side,
    edge: u16,
    generation: u64,
}

/// Address table split on the 24 bit boundary: the first stage is keyed by the OUI half, the
/// second stage, created on first use, by the device half.
#[derive(Debug, Default)]
struct MacTable {
    stages: HashMap<u32, HashMap<u32, Entry>>,
    len: usize,
}

fn split(mac: MacKey) -> (u32, u32) {
    ((mac >> 24) as u32, (mac & 0x00ff_ffff) as u32)
}

impl MacTable {
    fn insert(&mut self, mac: MacKey, entry: Entry) {
        let (high, low) = split(mac);
        let stage = self.stages.entry(high).or_insert_with(HashMap::new);
        if stage.insert(low, entry).is_none() {
            self.len += 1;
        }
    }

    fn get(&self, mac: MacKey) -> Option<&Entry> {
        let (high, low) = split(mac);
        self.stages.get(&high)?.get(&low)
    }

    fn clear(&mut self) {
        self.stages.clear();
        self.len = 0;
    }
}

#[derive(Debug, Default)]
pub struct Switch {
    table: MacTable,
    // Per side, per edge unlink generation.
    generations: [Vec<u64>; 2],
    // Per side, per edge outgoing selection of the current burst.
    outputs: [Vec<Mask>; 2],
}

fn init(_config: &BrickConfig) -> Result<Box<dyn Brick>> {
    Ok(Box::new(Switch::default()))
}

impl Switch {
    /// Where frames to `mac` would be sent, if the address was learned and its edge is
    /// still the one it was learned on.
    pub fn lookup(&self, mac: MacAddr) -> Option<(Side, u16)> {
        let entry = self.table.get(headers::mac_key(mac))?;
        if entry.generation == self.generation(entry.side, entry.edge) {
            Some((entry.side, entry.edge))
        } else {
            None
        }
    }

    /// Number of learned addresses, stale ones included.
    pub fn table_len(&self) -> usize {
        self.table.len
    }

    fn generation(&self, side: Side, edge: u16) -> u64 {
        self.generations[side.index()]
            .get(edge as usize)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&mut self, side: Side, edge: u16) {
        let generations = &mut self.generations[side.index()];
        if generations.len() <= edge as usize {
            generations.resize(edge as usize + 1, 0);
        }
        generations[edge as usize] += 1;
    }

    fn learn(&mut self, from: Side, edge: u16, pkts: &[Packet], mask: Mask) {
        let generation = self.generation(from, edge);
        for i in mask {
            if let Some(src) = headers::source(pkts[i].data()) {
                if headers::is_multicast(src) {
                    continue;
                }
                self.table.insert(
                    headers::mac_key(src),
                    Entry {
                        side: from,
                        edge,
                        generation,
                    },
                );
            }
        }
    }

    // Fill `outputs` with the per edge selection. Returns the flood selection.
    fn classify(
        &mut self,
        ctx: &Context<'_>,
        from: Side,
        edge: u16,
        pkts: &[Packet],
        mask: Mask,
    ) -> Mask {
        let mut flood = Mask::EMPTY;

        for i in mask {
            let dst = match headers::destination(pkts[i].data()) {
                Some(dst) => dst,
                None => {
                    trace!(node = %ctx.name(), slot = i, "runt frame dropped");
                    continue;
                }
            };

            if headers::is_reserved(dst) {
                continue;
            }
            if headers::is_multicast(dst) {
                flood.insert(i);
                continue;
            }

            match self.table.get(headers::mac_key(dst)).copied() {
                Some(entry)
                    if entry.generation == self.generation(entry.side, entry.edge)
                        && ctx.edge(entry.side, entry.edge).is_some() =>
                {
                    if entry.side == from && entry.edge == edge {
                        // Destination sits behind the ingress edge.
                        continue;
                    }
                    self.outputs[entry.side.index()][entry.edge as usize].insert(i);
                }
                _ => flood.insert(i),
            }
        }

        flood
    }
}

impl Brick for Switch {
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        for &side in Side::BOTH.iter() {
            let max = ctx.max_edges(side) as usize;
            if self.outputs[side.index()].len() < max {
                self.outputs[side.index()].resize(max, Mask::EMPTY);
            }
        }

        self.learn(from, edge, pkts, mask);
        let flood = self.classify(ctx, from, edge, pkts, mask);

        // One burst per destination edge, carrying everything bound there.
        let outputs = &self.outputs;
        let sides = Side::BOTH;
        let targets = sides.iter().flat_map(move |&side| {
            outputs[side.index()]
                .iter()
                .enumerate()
                .map(move |(index, &out)| {
                    if side == from && index == edge as usize {
                        (side, index as u16, out)
                    } else {
                        (side, index as u16, out | flood)
                    }
                })
        });
        let result = ctx.fan_out(targets, pkts);

        for outs in self.outputs.iter_mut() {
            for out in outs.iter_mut() {
                *out = Mask::EMPTY;
            }
        }

        result
    }

    fn unlink_notify(&mut self, _ctx: &mut Context<'_>, side: Side, edge: u16) -> Result<()> {
        self.bump(side, edge);
        Ok(())
    }

    fn unlink(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        for &side in Side::BOTH.iter() {
            for index in 0..ctx.max_edges(side) {
                self.bump(side, index);
            }
        }
        Ok(())
    }

    fn destroy(&mut self) {
        self.table.clear();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
