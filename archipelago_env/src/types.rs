//! Common types for the Archipelago environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a worker execution context.
///
/// Only used to tell workers apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Creates a new random WorkerId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic WorkerId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell workers apart
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Envelope for a message crossing the host/worker boundary.
///
/// The payload is opaque serialized bytes; the receiving side decodes it
/// into its own message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The serialized message
    pub payload: Vec<u8>,

    /// Sender's monotonic clock when the message was queued
    pub sent_at_ms: u64,
}

impl Envelope {
    /// Creates a new envelope from payload bytes.
    pub fn new(payload: Vec<u8>, sent_at_ms: u64) -> Self {
        Self {
            payload,
            sent_at_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_from_seed_is_stable() {
        assert_eq!(WorkerId::from_seed(7), WorkerId::from_seed(7));
        assert_ne!(WorkerId::from_seed(7), WorkerId::from_seed(8));
    }

    #[test]
    fn test_worker_id_display_is_short() {
        assert_eq!(WorkerId::new().to_string().len(), 8);
    }
}
