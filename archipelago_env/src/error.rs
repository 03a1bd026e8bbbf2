//! Error types for the Archipelago environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The other end of the worker channel is gone
    #[error("Worker channel closed")]
    ChannelClosed,

    /// Message serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The worker execution context could not be started
    #[error("Worker spawn failed: {0}")]
    WorkerSpawn(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a serialization error.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a spawn error.
    pub fn spawn(msg: impl std::fmt::Display) -> Self {
        Self::WorkerSpawn(msg.to_string())
    }
}
