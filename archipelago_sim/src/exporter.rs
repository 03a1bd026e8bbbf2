//! JSON exporter for offline inspection of a run.
//!
//! Each frame pairs the ground-truth walker positions with the island
//! census the controller reported at the same flush.

use crate::crowd::Walker;
use archipelago_core::status_report::IslandStatus;
use archipelago_core::IslandsStatusReport;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth positions of online walkers
    pub walkers: Vec<WalkerPosition>,

    /// Islands as reported by the controller
    pub islands: Vec<IslandStatus>,

    /// Notable events since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Position of a walker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<&Walker> for WalkerPosition {
    fn from(walker: &Walker) -> Self {
        Self {
            id: walker.id.clone(),
            x: walker.position.x,
            y: walker.position.y,
            z: walker.position.z,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Builds and appends a frame.
    pub fn record<'a, I>(&mut self, time_sec: f64, walkers: I, census: IslandsStatusReport, events: Vec<SimEvent>)
    where
        I: IntoIterator<Item = &'a Walker>,
    {
        self.add_frame(SimFrame {
            time_sec,
            walkers: walkers.into_iter().map(WalkerPosition::from).collect(),
            islands: census.data,
            events,
        });
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archipelago_core::status_report::ReportPosition;

    #[test]
    fn test_export_tracks_duration_and_shape() {
        let mut export = SimExport::new("flash_mob", 7);
        let census = IslandsStatusReport {
            data: vec![IslandStatus {
                id: "I1".to_string(),
                center: ReportPosition { x: 1.0, y: 0.0, z: 2.0 },
                max_peers: 200,
                radius: 3.0,
                peers: vec!["peer-0".to_string()],
            }],
        };

        export.record(1.5, std::iter::empty::<&Walker>(), census, vec![SimEvent::warn("transport 3 gone")]);
        export.finalize(true, None);

        assert_eq!(export.duration_sec, 1.5);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["frames"][0]["islands"][0]["maxPeers"], 200);
        assert_eq!(json["frames"][0]["events"][0]["level"], "warn");
        assert!(json.get("failure_reason").is_none());
    }
}
