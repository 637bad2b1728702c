use std::net::Ipv4Addr;

use thiserror::Error;

use crate::side::Side;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a graph operation can report.
///
/// Malformed tunnel headers are not represented here. They are filtered out of
/// the batch, never surfaced.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown brick type '{0}'")]
    UnknownType(String),

    #[error("brick type '{0}' is already registered")]
    DuplicateType(String),

    #[error("{side:?} side capacity {requested} does not fit an edge index")]
    CapacityTooLarge { side: Side, requested: u32 },

    #[error("{side:?} side of a single-neighbor brick cannot hold {requested} edges")]
    SingleCapacity { side: Side, requested: u32 },

    #[error("VNI {0} does not fit in 24 bits")]
    InvalidVni(u32),

    #[error("{0} is not a multicast group")]
    NotMulticast(Ipv4Addr),

    #[error("VNI {0} is already bound to another port")]
    VniInUse(u32),

    #[error("port {0} already has a VNI")]
    PortConfigured(u16),

    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    #[error("queue capacity {0} must be between 1 and {max}", max = crate::PENDING_LEN)]
    QueueCapacity(usize),

    #[error("'{0}' needs options")]
    MissingOptions(String),

    #[error("invalid options: {0}")]
    Options(#[from] serde_yaml::Error),

    #[error("node name '{0}' is used twice")]
    DuplicateName(String),

    #[error("no node named '{0}'")]
    UnknownName(String),
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("a node cannot be linked to itself")]
    SelfLink,

    #[error("{side:?} side of '{node}' is full")]
    SideFull { node: String, side: Side },

    #[error("node not found")]
    NodeNotFound,

    #[error("no edge {edge} on {side:?} side")]
    EdgeNotFound { side: Side, edge: u16 },

    #[error("nodes are not linked")]
    NotLinked,

    #[error("'{0}' has no reference left beyond the ones its edges hold")]
    StillLinked(String),

    #[error("'{0}' is already processing a burst")]
    Busy(String),

    #[error("'{0}' is not of the requested brick type")]
    WrongType(String),

    #[error("'{0}' does not source packets")]
    PollUnsupported(String),
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("need {needed} bytes of headroom, {available} available")]
    Headroom { needed: usize, available: usize },

    #[error("cannot strip {needed} bytes from a {len} byte packet")]
    Truncated { needed: usize, len: usize },

    #[error("burst of {0} packets exceeds the batch capacity")]
    BurstTooLarge(usize),

    #[error("active mask {mask:#018x} selects slots beyond {len} packets")]
    MaskOutOfRange { mask: u64, len: usize },

    #[error("{len} byte frame does not fit in a tunnel packet, at most {max}")]
    TooLong { len: usize, max: usize },
}
