//! Pass-through brick: whatever enters one side leaves through the other.

use std::any::Any;

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::Result;
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};

pub const BRICK_TYPE: BrickType = BrickType {
    name: "nop",
    capacity: CapacityClass::Single,
    init,
};

#[derive(Debug, Default)]
pub struct Nop;

fn init(_config: &BrickConfig) -> Result<Box<dyn Brick>> {
    Ok(Box::new(Nop))
}

impl Brick for Nop {
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        _edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        ctx.forward(from.opposite(), pkts, mask)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
