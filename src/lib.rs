// src/lib.rs
//! A credit-based flow-controlled remote input channel: the receiver-side
//! endpoint that consumes an ordered stream of data buffers from a producer
//! subpartition across a network connection.

pub mod buffer_queue;
pub mod channel;
pub mod config;
pub mod credit;
pub mod dedup;
pub mod error;
pub mod gate;
pub mod ids;
pub mod metrics;
pub mod util;

pub use channel::{BufferAndAvailability, LocalInputChannel, RemoteInputChannel};
pub use error::{ChannelError, ChannelResult};
pub use ids::{ConnectionId, InputChannelId, PartitionId};
