use std::fmt;

use tracing::{debug, warn};

use crate::brick::{Brick, Context};
use crate::config::{BrickConfig, TopologyConfig};
use crate::error::{ConfigurationError, ResourceError, Result, TopologyError};
use crate::mask::Mask;
use crate::packet::Packet;
use crate::registry::Registry;
use crate::side::{CapacityClass, Edge, Side, SideState};
use crate::MAX_BURST;

/// Edge slots per side of a multiple-neighbor brick when the configuration is silent.
pub const DEFAULT_MAX_EDGES: u16 = 32;

/// Handle to a node of a `Graph`. Goes stale once the node is destroyed.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> NodeId {
        NodeId { index, generation }
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeId({}v{})", self.index, self.generation)
    }
}

struct Node {
    name: String,
    kind: &'static str,
    refcount: u32,
    sides: [SideState; 2],
    // None while one of the brick's callbacks is running.
    brick: Option<Box<dyn Brick>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// A packet graph. Owns every node; nodes refer to each other through `NodeId`s stored in
/// their edges.
pub struct Graph {
    registry: Registry,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new(Registry::with_builtins())
    }
}

impl Graph {
    pub fn new(registry: Registry) -> Graph {
        Graph {
            registry,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Build a graph from a topology description: nodes are created, then linked, in file
    /// order.
    pub fn from_config(registry: Registry, config: &TopologyConfig) -> Result<Graph> {
        let mut graph = Graph::new(registry);

        for node in &config.nodes {
            if graph.find(&node.brick.name).is_some() {
                return Err(ConfigurationError::DuplicateName(node.brick.name.clone()).into());
            }
            graph.create(&node.kind, &node.brick)?;
        }

        for link in &config.links {
            let west = graph
                .find(&link.west)
                .ok_or_else(|| ConfigurationError::UnknownName(link.west.clone()))?;
            let east = graph
                .find(&link.east)
                .ok_or_else(|| ConfigurationError::UnknownName(link.east.clone()))?;
            graph.link(west, east)?;
        }

        Ok(graph)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn get(&self, id: NodeId) -> Result<&Node> {
        Ok(self.node(id).ok_or(TopologyError::NodeNotFound)?)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        Ok(self.node_mut(id).ok_or(TopologyError::NodeNotFound)?)
    }

    //
    // Lifecycle
    //

    /// Create a node of the registered type `kind`. The node starts with one reference, held
    /// by the caller.
    pub fn create(&mut self, kind: &str, config: &BrickConfig) -> Result<NodeId> {
        let ty = *self
            .registry
            .get(kind)
            .ok_or_else(|| ConfigurationError::UnknownType(kind.to_string()))?;

        let west = side_capacity(ty.capacity, Side::West, config.west)?;
        let east = side_capacity(ty.capacity, Side::East, config.east)?;

        let brick = (ty.init)(config)?;

        let node = Node {
            name: config.name.clone(),
            kind: ty.name,
            refcount: 1,
            sides: [SideState::new(west), SideState::new(east)],
            brick: Some(brick),
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new((self.slots.len() - 1) as u32, 0)
            }
        };

        debug!(node = %config.name, kind, west, east, "created");

        Ok(id)
    }

    pub fn incref(&mut self, id: NodeId) -> Result<()> {
        self.get_mut(id)?.refcount += 1;
        Ok(())
    }

    /// Drop one reference. The node is destroyed when the last one goes.
    ///
    /// References held by edges are only dropped by unlinking.
    pub fn decref(&mut self, id: NodeId) -> Result<()> {
        let node = self.get_mut(id)?;
        let edges: u32 = node.sides.iter().map(|s| u32::from(s.count)).sum();
        if node.refcount <= edges {
            return Err(TopologyError::StillLinked(node.name.clone()).into());
        }
        node.refcount -= 1;
        if node.refcount == 0 {
            self.free_node(id);
        }
        Ok(())
    }

    /// Unlink the node from everything, then drop the caller's reference.
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        self.unlink(id)?;
        self.decref(id)
    }

    fn free_node(&mut self, id: NodeId) {
        let slot = &mut self.slots[id.index as usize];
        if let Some(mut node) = slot.node.take() {
            if let Some(brick) = node.brick.as_mut() {
                brick.destroy();
            }
            debug!(node = %node.name, "destroyed");
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    //
    // Topology
    //

    /// Link `west`'s east side to `east`'s west side.
    pub fn link(&mut self, west: NodeId, east: NodeId) -> Result<()> {
        if west == east {
            return Err(TopologyError::SelfLink.into());
        }

        let west_index = free_slot(self.get(west)?, Side::East)?;
        let east_index = free_slot(self.get(east)?, Side::West)?;

        let w = self.get_mut(west)?;
        w.sides[Side::East.index()].set(
            west_index,
            Edge {
                link: east,
                pair_index: east_index,
            },
        );
        w.refcount += 1;

        let e = self.get_mut(east)?;
        e.sides[Side::West.index()].set(
            east_index,
            Edge {
                link: west,
                pair_index: west_index,
            },
        );
        e.refcount += 1;

        if let Some(brick) = self.get_mut(west)?.brick.as_mut() {
            brick.link_notify(Side::East, west_index, east);
        }
        if let Some(brick) = self.get_mut(east)?.brick.as_mut() {
            brick.link_notify(Side::West, east_index, west);
        }

        debug!(
            west = %self.get(west)?.name,
            east = %self.get(east)?.name,
            west_index,
            east_index,
            "linked"
        );

        Ok(())
    }

    /// Remove every edge of `id`.
    ///
    /// Peers are told about each edge they are losing before any reference is dropped, then
    /// the node's own unlink callback runs, and only then are refcounts decremented and slots
    /// cleared. Peers left without references are destroyed last.
    pub fn unlink(&mut self, id: NodeId) -> Result<()> {
        let mut edges = Vec::new();
        let name = {
            let node = self.get(id)?;
            for &side in Side::BOTH.iter() {
                for (index, edge) in node.sides[side.index()].occupied() {
                    edges.push((side, index, edge));
                }
            }
            node.name.clone()
        };

        for &(side, _, edge) in &edges {
            self.notify_unlink(edge.link, side.opposite(), edge.pair_index);
        }
        self.call_unlink(id);

        let mut released = Vec::new();
        for &(side, index, edge) in &edges {
            if self.release_edge(id, side, index, edge) {
                released.push(edge.link);
            }
        }
        if self.refcount(id) == Some(0) {
            released.push(id);
        }
        for node in released {
            self.free_node(node);
        }

        debug!(node = %name, edges = edges.len(), "unlinked");

        Ok(())
    }

    /// Remove a single edge between `west`'s east side and `east`'s west side.
    pub fn unlink_edge(&mut self, west: NodeId, east: NodeId) -> Result<()> {
        let node = self.get(west)?;
        self.get(east)?;

        let (index, edge) = node.sides[Side::East.index()]
            .occupied()
            .find(|(_, e)| e.link == east)
            .ok_or(TopologyError::NotLinked)?;

        self.notify_unlink(east, Side::West, edge.pair_index);
        self.notify_unlink(west, Side::East, index);

        let east_freed = self.release_edge(west, Side::East, index, edge);
        let west_freed = self.get(west)?.refcount == 0;
        if east_freed {
            self.free_node(east);
        }
        if west_freed {
            self.free_node(west);
        }

        Ok(())
    }

    fn notify_unlink(&mut self, id: NodeId, side: Side, index: u16) {
        let mut brick = match self.node_mut(id).and_then(|n| n.brick.take()) {
            Some(brick) => brick,
            None => return,
        };

        let r = brick.unlink_notify(
            &mut Context {
                graph: self,
                node: id,
            },
            side,
            index,
        );
        if let Err(err) = r {
            warn!(node = ?id, ?side, edge = index, error = %err, "unlink notify failed");
        }

        if let Some(node) = self.node_mut(id) {
            node.brick = Some(brick);
        }
    }

    fn call_unlink(&mut self, id: NodeId) {
        let mut brick = match self.node_mut(id).and_then(|n| n.brick.take()) {
            Some(brick) => brick,
            None => return,
        };

        let r = brick.unlink(&mut Context {
            graph: self,
            node: id,
        });
        if let Err(err) = r {
            warn!(node = ?id, error = %err, "unlink callback failed");
        }

        if let Some(node) = self.node_mut(id) {
            node.brick = Some(brick);
        }
    }

    // Decrement both ends, then clear both slots. Returns true if the peer lost its last
    // reference; freeing it is left to the caller.
    fn release_edge(&mut self, id: NodeId, side: Side, index: u16, edge: Edge) -> bool {
        if let Some(node) = self.node_mut(id) {
            node.refcount -= 1;
        }
        let peer_released = match self.node_mut(edge.link) {
            Some(peer) => {
                peer.refcount -= 1;
                peer.refcount == 0
            }
            None => false,
        };

        if let Some(node) = self.node_mut(id) {
            node.sides[side.index()].clear(index);
        }
        if let Some(peer) = self.node_mut(edge.link) {
            peer.sides[side.opposite().index()].clear(edge.pair_index);
        }

        peer_released
    }

    //
    // Data path
    //

    /// Hand a batch to `id` as if it arrived on its `from` side through edge `edge`.
    ///
    /// On success the `from` side's packet counter grows by the number of active slots.
    pub fn burst(
        &mut self,
        id: NodeId,
        from: Side,
        edge: u16,
        pkts: &mut [Packet],
        mask: Mask,
    ) -> Result<()> {
        if pkts.len() > MAX_BURST {
            return Err(ResourceError::BurstTooLarge(pkts.len()).into());
        }
        if !mask.fits(pkts.len()) {
            return Err(ResourceError::MaskOutOfRange {
                mask: mask.bits(),
                len: pkts.len(),
            }
            .into());
        }

        let mut brick = self.take_brick(id)?;

        let r = brick.burst(
            &mut Context {
                graph: self,
                node: id,
            },
            from,
            edge,
            pkts,
            mask,
        );

        if let Some(node) = self.node_mut(id) {
            node.brick = Some(brick);
            if r.is_ok() {
                node.sides[from.index()].packets += u64::from(mask.count());
            }
        }

        r
    }

    /// Let a self-sourcing node emit packets. Returns how many it sent.
    pub fn poll(&mut self, id: NodeId) -> Result<usize> {
        let mut brick = self.take_brick(id)?;

        let r = brick.poll(&mut Context {
            graph: self,
            node: id,
        });

        if let Some(node) = self.node_mut(id) {
            node.brick = Some(brick);
        }

        r
    }

    fn take_brick(&mut self, id: NodeId) -> Result<Box<dyn Brick>> {
        let node = self.get_mut(id)?;
        match node.brick.take() {
            Some(brick) => Ok(brick),
            None => Err(TopologyError::Busy(node.name.clone()).into()),
        }
    }

    /// Run `f` against the brick of `id` downcast to `B`, with a `Context` for the node.
    pub fn with_brick<B, R, F>(&mut self, id: NodeId, f: F) -> Result<R>
    where
        B: Brick + 'static,
        F: FnOnce(&mut B, &mut Context<'_>) -> Result<R>,
    {
        let mut brick = self.take_brick(id)?;

        let r = match brick.as_any_mut().downcast_mut::<B>() {
            Some(b) => f(
                b,
                &mut Context {
                    graph: self,
                    node: id,
                },
            ),
            None => Err(TopologyError::WrongType(self.name(id).unwrap_or("").to_string()).into()),
        };

        if let Some(node) = self.node_mut(id) {
            node.brick = Some(brick);
        }

        r
    }

    //
    // Inspection
    //

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.slots.iter().enumerate().find_map(|(i, slot)| match &slot.node {
            Some(node) if node.name == name => Some(NodeId::new(i as u32, slot.generation)),
            _ => None,
        })
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    pub fn type_name(&self, id: NodeId) -> Option<&'static str> {
        self.node(id).map(|n| n.kind)
    }

    pub fn refcount(&self, id: NodeId) -> Option<u32> {
        self.node(id).map(|n| n.refcount)
    }

    pub fn edge(&self, id: NodeId, side: Side, index: u16) -> Option<Edge> {
        self.node(id)?.sides[side.index()].edge(index)
    }

    pub fn edges(&self, id: NodeId, side: Side) -> Vec<(u16, Edge)> {
        match self.node(id) {
            Some(node) => node.sides[side.index()].occupied().collect(),
            None => Vec::new(),
        }
    }

    pub fn edge_count(&self, id: NodeId, side: Side) -> Option<u16> {
        self.node(id).map(|n| n.sides[side.index()].count)
    }

    pub fn max_edges(&self, id: NodeId, side: Side) -> Option<u16> {
        self.node(id).map(|n| n.sides[side.index()].max())
    }

    /// Packets accepted on `side` so far.
    pub fn packet_count(&self, id: NodeId, side: Side) -> Option<u64> {
        self.node(id).map(|n| n.sides[side.index()].packets)
    }
}

fn side_capacity(class: CapacityClass, side: Side, requested: Option<u32>) -> Result<u16> {
    match (class, requested) {
        (CapacityClass::Single, None) => Ok(1),
        (CapacityClass::Single, Some(n)) if n > 1 => {
            Err(ConfigurationError::SingleCapacity { side, requested: n }.into())
        }
        (CapacityClass::Single, Some(n)) => Ok(n as u16),
        (CapacityClass::Multiple, None) => Ok(DEFAULT_MAX_EDGES),
        (CapacityClass::Multiple, Some(n)) if n > u32::from(u16::MAX) => {
            Err(ConfigurationError::CapacityTooLarge { side, requested: n }.into())
        }
        (CapacityClass::Multiple, Some(n)) => Ok(n as u16),
    }
}

fn free_slot(node: &Node, side: Side) -> Result<u16> {
    let state = &node.sides[side.index()];
    match state.free_slot() {
        Some(index) if !state.is_full() => Ok(index),
        _ => Err(TopologyError::SideFull {
            node: node.name.clone(),
            side,
        }
        .into()),
    }
}
