//! Clustering tunables and their validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables for the clustering engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchipelagoOptions {
    /// Max island-to-island proximity before two islands merge (default: 64)
    pub join_distance: f64,

    /// Max peer-to-peer proximity to stay together; beyond it islands split (default: 80)
    pub leave_distance: f64,

    /// Capacity of peer-to-peer islands when the registry reports none (default: 200)
    pub max_peers_per_island: usize,
}

impl Default for ArchipelagoOptions {
    fn default() -> Self {
        Self {
            join_distance: 64.0,
            leave_distance: 80.0,
            max_peers_per_island: 200,
        }
    }
}

/// Partial option update; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_distance: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leave_distance: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_peers_per_island: Option<usize>,
}

/// Rejected option values.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OptionsError {
    #[error("{name} must be a finite, non-negative number (got {value})")]
    InvalidDistance { name: &'static str, value: f64 },

    /// A join distance above the leave distance makes islands merge and
    /// split again on every pass.
    #[error("join distance {join} exceeds leave distance {leave}")]
    JoinExceedsLeave { join: f64, leave: f64 },

    #[error("max peers per island must be at least 1")]
    ZeroCapacity,
}

impl ArchipelagoOptions {
    /// Creates options with the given distances and the default capacity.
    pub fn with_distances(join_distance: f64, leave_distance: f64) -> Self {
        Self {
            join_distance,
            leave_distance,
            ..Self::default()
        }
    }

    /// Checks that the distances can drive a stable partition and that
    /// new islands can hold their founder.
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (name, value) in [
            ("join distance", self.join_distance),
            ("leave distance", self.leave_distance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OptionsError::InvalidDistance { name, value });
            }
        }

        if self.join_distance > self.leave_distance {
            return Err(OptionsError::JoinExceedsLeave {
                join: self.join_distance,
                leave: self.leave_distance,
            });
        }

        if self.max_peers_per_island == 0 {
            return Err(OptionsError::ZeroCapacity);
        }

        Ok(())
    }

    /// Returns a copy with the present fields of `update` applied.
    pub fn merged(&self, update: &UpdatableOptions) -> Self {
        Self {
            join_distance: update.join_distance.unwrap_or(self.join_distance),
            leave_distance: update.leave_distance.unwrap_or(self.leave_distance),
            max_peers_per_island: update
                .max_peers_per_island
                .unwrap_or(self.max_peers_per_island),
        }
    }
}
