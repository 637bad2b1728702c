pub mod brick;
pub mod collect;
pub mod config;
pub mod error;
pub mod graph;
pub mod headers;
pub mod hub;
pub mod mask;
pub mod nop;
pub mod packet;
pub mod queue;
pub mod registry;
pub mod side;
pub mod switch;
pub mod vtep;

pub use brick::{Brick, BrickType, Context};
pub use config::{BrickConfig, TopologyConfig};
pub use error::{Error, Result};
pub use graph::{Graph, NodeId};
pub use mask::Mask;
pub use packet::Packet;
pub use registry::Registry;
pub use side::{CapacityClass, Edge, Side};

/// Most packets a single burst can carry.
pub const MAX_BURST: usize = 64;

/// Largest number of packets a queue brick can hold.
pub const PENDING_LEN: usize = 4096;
