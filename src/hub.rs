//! Hub brick: every packet is repeated on every edge but the one it came from.

use std::any::Any;

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::Result;
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};

pub const BRICK_TYPE: BrickType = BrickType {
    name: "hub",
    capacity: CapacityClass::Multiple,
    init,
};

#[derive(Debug, Default)]
pub struct Hub;

fn init(_config: &BrickConfig) -> Result<Box<dyn Brick>> {
    Ok(Box::new(Hub))
}

impl Brick for Hub {
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        let max = [ctx.max_edges(Side::West), ctx.max_edges(Side::East)];
        let sides = Side::BOTH;
        let targets = sides.iter().flat_map(move |&side| {
            (0..max[side.index()])
                .filter(move |&index| !(side == from && index == edge))
                .map(move |index| (side, index, mask))
        });
        ctx.fan_out(targets, pkts)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
