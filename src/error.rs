// src/error.rs
//! Error taxonomy for the remote input channel's public API.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("partition not found after exhausting backoff")]
    PartitionNotFound,

    #[error("buffer reordering: expected {expected}, got {actual}")]
    BufferReordering { expected: u64, actual: u64 },

    #[error("channel already released")]
    Released,

    #[error("subpartition not yet requested")]
    NotRequested,

    #[error("exclusive segments already assigned")]
    AlreadyAssigned,

    #[error("assignExclusiveSegments called with an empty segment list")]
    EmptySegments,

    #[error("notifyBufferAvailable invoked while not waiting for floating buffers")]
    NotWaitingForBuffers,

    #[error("no partition request client available for this event")]
    NoClient,

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors stored via `setError` for later surfacing on the task thread.
/// A separate, `Clone`-able type from `ChannelError` because the stored
/// slot must be read repeatedly (errors are never cleared once set) while
/// `anyhow::Error` itself is not `Clone`.
#[derive(Debug, Clone)]
pub enum StoredError {
    BufferReordering { expected: u64, actual: u64 },
    Transport(Arc<str>),
}

impl From<StoredError> for ChannelError {
    fn from(e: StoredError) -> Self {
        match e {
            StoredError::BufferReordering { expected, actual } => {
                ChannelError::BufferReordering { expected, actual }
            }
            StoredError::Transport(msg) => ChannelError::Transport(anyhow::anyhow!(msg.to_string())),
        }
    }
}
