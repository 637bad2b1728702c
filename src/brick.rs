use std::any::Any;

use arrayvec::ArrayVec;

use crate::config::BrickConfig;
use crate::error::{ResourceError, Result, TopologyError};
use crate::graph::{Graph, NodeId};
use crate::mask::Mask;
use crate::packet::Packet;
use crate::side::{CapacityClass, Edge, Side};
use crate::MAX_BURST;

/// Behavior of one node type.
///
/// Only `burst` is mandatory. The callbacks run synchronously on the thread driving the graph.
pub trait Brick: Send {
    /// Process the packets of `pkts` selected by `mask`, arriving on `from` through edge
    /// `edge`. Packets a brick wants to keep beyond the call must be cloned.
    fn burst(
        &mut self,
        ctx: &mut Context<'_>,
        from: Side,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()>;

    /// Emit self-sourced packets. Returns how many were sent.
    fn poll(&mut self, ctx: &mut Context<'_>) -> Result<usize> {
        Err(TopologyError::PollUnsupported(ctx.name().to_string()).into())
    }

    /// Edge `edge` of `side` now links to `peer`.
    fn link_notify(&mut self, _side: Side, _edge: u16, _peer: NodeId) {}

    /// Edge `edge` of `side` is about to be removed. Called before any reference is dropped.
    fn unlink_notify(&mut self, _ctx: &mut Context<'_>, _side: Side, _edge: u16) -> Result<()> {
        Ok(())
    }

    /// This node is about to lose all of its edges.
    fn unlink(&mut self, _ctx: &mut Context<'_>) -> Result<()> {
        Ok(())
    }

    /// Last reference dropped.
    fn destroy(&mut self) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type InitFn = fn(&BrickConfig) -> Result<Box<dyn Brick>>;

/// Registry entry of a node type.
#[derive(Copy, Clone)]
pub struct BrickType {
    pub name: &'static str,
    pub capacity: CapacityClass,
    pub init: InitFn,
}

/// What a brick sees of the graph while one of its callbacks runs: its own edges, and a way
/// to hand packets to its neighbors.
pub struct Context<'g> {
    pub(crate) graph: &'g mut Graph,
    pub(crate) node: NodeId,
}

impl<'g> Context<'g> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        self.graph.name(self.node).unwrap_or("")
    }

    pub fn edge(&self, side: Side, index: u16) -> Option<Edge> {
        self.graph.edge(self.node, side, index)
    }

    pub fn edge_count(&self, side: Side) -> u16 {
        self.graph.edge_count(self.node, side).unwrap_or(0)
    }

    pub fn max_edges(&self, side: Side) -> u16 {
        self.graph.max_edges(self.node, side).unwrap_or(0)
    }

    /// Index of the first edge of `side` linking to `peer`.
    pub fn find_edge(&self, side: Side, peer: NodeId) -> Option<u16> {
        (0..self.max_edges(side))
            .find(|&i| self.edge(side, i).map_or(false, |e| e.link == peer))
    }

    /// Deliver to the neighbor behind one edge. An empty mask or an unoccupied slot is a no-op.
    pub fn burst_edge(
        &mut self,
        side: Side,
        index: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        if mask.is_empty() {
            return Ok(());
        }
        match self.edge(side, index) {
            Some(edge) => self
                .graph
                .burst(edge.link, side.opposite(), edge.pair_index, pkts, mask),
            None => Ok(()),
        }
    }

    /// Deliver to every neighbor of `side`, in edge order. Stops at the first failure; edges
    /// already served keep what they got.
    pub fn forward(&mut self, side: Side, pkts: &mut [Packet], mask: Mask) -> Result<()> {
        let targets = (0..self.max_edges(side)).map(|index| (side, index, mask));
        self.fan_out(targets, pkts)
    }

    /// Deliver `pkts` to several edges, each with its own selection, in iteration order.
    ///
    /// Every edge but the last one served gets duplicated handles, so what a neighbor does to
    /// its packets (stripping or prepending headers in place) is never seen by the next one.
    /// Only the last edge works on `pkts` itself. Empty selections and unoccupied slots are
    /// skipped. Stops at the first failure.
    pub fn fan_out<I>(&mut self, targets: I, pkts: &mut [Packet]) -> Result<()>
    where
        I: IntoIterator<Item = (Side, u16, Mask)>,
    {
        let mut pending: Option<(Side, u16, Mask)> = None;

        for target in targets {
            let (side, index, mask) = target;
            if mask.is_empty() || self.edge(side, index).is_none() {
                continue;
            }
            if let Some((side, index, mask)) = pending.replace(target) {
                let mut dup = duplicate(pkts, mask)?;
                self.burst_edge(side, index, &mut dup, mask)?;
            }
        }

        match pending {
            Some((side, index, mask)) => self.burst_edge(side, index, pkts, mask),
            None => Ok(()),
        }
    }
}

// New handles on the same buffers for every slot up to the last active one.
fn duplicate(pkts: &[Packet], mask: Mask) -> Result<ArrayVec<Packet, MAX_BURST>> {
    let span = mask.span();
    if span > pkts.len() {
        return Err(ResourceError::MaskOutOfRange {
            mask: mask.bits(),
            len: pkts.len(),
        }
        .into());
    }
    Ok(pkts[..span].iter().cloned().collect())
}
