//! Sink brick that keeps a reference to every packet it receives, per side.

use std::any::Any;

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::Result;
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};

pub const BRICK_TYPE: BrickType = BrickType {
    name: "collect",
    capacity: CapacityClass::Single,
    init,
};

#[derive(Debug, Default)]
pub struct Collect {
    received: [Vec<Packet>; 2],
    bursts: [u64; 2],
}

fn init(_config: &BrickConfig) -> Result<Box<dyn Brick>> {
    Ok(Box::new(Collect::default()))
}

impl Collect {
    /// Remove and return what arrived on `side`, oldest first.
    pub fn take(&mut self, side: Side) -> Vec<Packet> {
        std::mem::take(&mut self.received[side.index()])
    }

    pub fn packets(&self, side: Side) -> &[Packet] {
        &self.received[side.index()]
    }

    /// Number of burst calls received on `side`.
    pub fn bursts(&self, side: Side) -> u64 {
        self.bursts[side.index()]
    }
}

impl Brick for Collect {
    fn burst(
        &mut self,
        _ctx: &mut Context<'_>,
        from: Side,
        _edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        let received = &mut self.received[from.index()];
        received.extend(mask.iter().map(|i| pkts[i].clone()));
        self.bursts[from.index()] += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        self.received = Default::default();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
