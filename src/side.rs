use serde::{Deserialize, Serialize};

use crate::graph::NodeId;

/// One of the two faces of a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    West = 0,
    East = 1,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::West, Side::East];

    pub fn opposite(self) -> Side {
        match self {
            Side::West => Side::East,
            Side::East => Side::West,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// How many neighbors a side may hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CapacityClass {
    /// Exactly one edge per side.
    Single,
    /// Up to a configured number of edges per side.
    Multiple,
}

/// A wired connection as seen from one end.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// The neighbor.
    pub link: NodeId,
    /// Index of the reciprocal edge on the neighbor's opposite side.
    pub pair_index: u16,
}

#[derive(Debug)]
pub(crate) struct SideState {
    pub(crate) edges: Vec<Option<Edge>>,
    pub(crate) count: u16,
    pub(crate) packets: u64,
}

impl SideState {
    pub(crate) fn new(max: u16) -> SideState {
        SideState {
            edges: vec![None; max as usize],
            count: 0,
            packets: 0,
        }
    }

    pub(crate) fn max(&self) -> u16 {
        self.edges.len() as u16
    }

    pub(crate) fn is_full(&self) -> bool {
        self.count >= self.max()
    }

    pub(crate) fn free_slot(&self) -> Option<u16> {
        self.edges.iter().position(Option::is_none).map(|i| i as u16)
    }

    pub(crate) fn edge(&self, index: u16) -> Option<Edge> {
        self.edges.get(index as usize).copied().flatten()
    }

    pub(crate) fn set(&mut self, index: u16, edge: Edge) {
        debug_assert!(self.edges[index as usize].is_none());
        self.edges[index as usize] = Some(edge);
        self.count += 1;
    }

    pub(crate) fn clear(&mut self, index: u16) -> Option<Edge> {
        let edge = self.edges.get_mut(index as usize)?.take();
        if edge.is_some() {
            self.count -= 1;
        }
        edge
    }

    pub(crate) fn occupied(&self) -> impl Iterator<Item = (u16, Edge)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|e| (i as u16, e)))
    }
}
