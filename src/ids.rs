// src/ids.rs
//! Opaque identifiers for channels, partitions and connections.
//!
//! These mirror the teacher's preference for small `Copy` newtypes over
//! general-purpose UUIDs (see `pool::Pkt::seq`/`chan`): every id here is a
//! thin wrapper around an integer that the owning `InputGate` hands out.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier for a single input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputChannelId(u64);

impl InputChannelId {
    /// Hands out a fresh, process-unique id. Channels never reuse an id,
    /// even across release/reincarnation, so stale references fail loudly
    /// rather than silently aliasing a new channel.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InputChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// Logical identifier of the result partition a channel consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u64);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "partition-{}", self.0)
    }
}

/// Identifies the remote producer a channel's connection is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection-{}", self.0)
    }
}
