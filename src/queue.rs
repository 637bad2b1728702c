//! Queue brick: holds packets until polled.
//!
//! Packets arriving on either side are stored in a bounded ring. `poll` drains up to one burst
//! worth of them towards the side opposite to the one each packet came from. When the ring is
//! full the oldest packet is dropped.
//!
//! ```yaml
//! - name: q0
//!   type: queue
//!   options:
//!     capacity: 512
//! ```

use std::any::Any;

use arraydeque::{ArrayDeque, Wrapping};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::brick::{Brick, BrickType, Context};
use crate::config::BrickConfig;
use crate::error::{ConfigurationError, Result};
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Side};
use crate::{MAX_BURST, PENDING_LEN};

pub const BRICK_TYPE: BrickType = BrickType {
    name: "queue",
    capacity: CapacityClass::Single,
    init,
};

fn default_capacity() -> usize {
    PENDING_LEN
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Packets held before the oldest ones are evicted, at most `PENDING_LEN`.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> QueueOptions {
        QueueOptions {
            capacity: default_capacity(),
        }
    }
}

pub struct Queue {
    pending: Box<ArrayDeque<[(Side, Packet); PENDING_LEN], Wrapping>>,
    capacity: usize,
    dropped: u64,
}

fn init(config: &BrickConfig) -> Result<Box<dyn Brick>> {
    let options: QueueOptions = config.options()?;
    Ok(Box::new(Queue::with_options(&options)?))
}

impl Queue {
    pub fn new() -> Queue {
        Queue {
            pending: Box::new(ArrayDeque::new()),
            capacity: PENDING_LEN,
            dropped: 0,
        }
    }

    pub fn with_options(options: &QueueOptions) -> Result<Queue> {
        if options.capacity == 0 || options.capacity > PENDING_LEN {
            return Err(ConfigurationError::QueueCapacity(options.capacity).into());
        }
        Ok(Queue {
            capacity: options.capacity,
            ..Queue::new()
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets waiting for `poll`.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Packets evicted because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for Queue {
    fn default() -> Queue {
        Queue::new()
    }
}

impl Brick for Queue {
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        _edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        for i in mask {
            let evicted = if self.pending.len() >= self.capacity {
                self.pending.pop_front()
            } else {
                None
            };
            let wrapped = self.pending.push_back((from, pkts[i].clone()));
            if evicted.is_some() || wrapped.is_some() {
                self.dropped += 1;
                trace!(node = %ctx.name(), "queue full, oldest packet dropped");
            }
        }
        Ok(())
    }

    fn poll(&mut self, ctx: &mut Context<'_>) -> Result<usize> {
        let mut eastbound: ArrayVec<Packet, MAX_BURST> = ArrayVec::new();
        let mut westbound: ArrayVec<Packet, MAX_BURST> = ArrayVec::new();

        while eastbound.len() + westbound.len() < MAX_BURST {
            match self.pending.pop_front() {
                Some((Side::West, pkt)) => eastbound.push(pkt),
                Some((Side::East, pkt)) => westbound.push(pkt),
                None => break,
            }
        }

        let sent = eastbound.len() + westbound.len();
        let mask = Mask::first(eastbound.len());
        ctx.forward(Side::East, &mut eastbound, mask)?;
        let mask = Mask::first(westbound.len());
        ctx.forward(Side::West, &mut westbound, mask)?;

        Ok(sent)
    }

    fn destroy(&mut self) {
        self.pending.clear();
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn options_default_to_full_ring() {
        assert_eq!(QueueOptions::default().capacity, PENDING_LEN);
        let options: QueueOptions = serde_yaml::from_str("{}").unwrap();
        assert_eq!(options.capacity, PENDING_LEN);
        let options: QueueOptions = serde_yaml::from_str("capacity: 16").unwrap();
        assert_eq!(options.capacity, 16);
    }

    #[test]
    fn rejects_capacity_out_of_range() {
        for &capacity in &[0, PENDING_LEN + 1] {
            match Queue::with_options(&QueueOptions { capacity }) {
                Err(Error::Configuration(ConfigurationError::QueueCapacity(n))) => {
                    assert_eq!(n, capacity)
                }
                Err(err) => panic!("unexpected: {}", err),
                Ok(_) => panic!("capacity {} accepted", capacity),
            }
        }
        assert_eq!(Queue::with_options(&QueueOptions { capacity: 3 }).unwrap().capacity(), 3);
    }
}
