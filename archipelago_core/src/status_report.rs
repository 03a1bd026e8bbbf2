//! Periodic census of islands for external monitoring.

use crate::controller::{ArchipelagoController, ControllerError};
use crate::island_engine::Island;
use archipelago_env::{ArchipelagoContext, WorkerChannel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One island in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IslandStatus {
    pub id: String,
    pub center: ReportPosition,
    pub max_peers: usize,
    pub radius: f64,
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IslandsStatusReport {
    pub data: Vec<IslandStatus>,
}

impl IslandsStatusReport {
    pub fn from_islands(islands: &[Island]) -> Self {
        let data = islands
            .iter()
            .map(|island| IslandStatus {
                id: island.id.clone(),
                center: ReportPosition {
                    x: island.center[0],
                    y: island.center[1],
                    z: island.center[2],
                },
                max_peers: island.max_peers,
                radius: island.radius,
                peers: island.peers.iter().map(|peer| peer.id.clone()).collect(),
            })
            .collect();

        Self { data }
    }

    /// Builds a report from the controller's current islands.
    pub async fn collect<Ctx, Ch>(controller: &ArchipelagoController<Ctx, Ch>) -> Result<Self, ControllerError>
    where
        Ctx: ArchipelagoContext,
        Ch: WorkerChannel,
    {
        let islands = controller.get_islands().await?;
        Ok(Self::from_islands(&islands))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn total_peers(&self) -> usize {
        self.data.iter().map(|island| island.peers.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::island_engine::PeerData;
    use serde_json::json;

    fn island() -> Island {
        Island {
            id: "I1".to_string(),
            peers: vec![
                PeerData {
                    id: "a".to_string(),
                    position: [0.0, 0.0, 0.0],
                    preferred_island_id: None,
                    island_id: Some("I1".to_string()),
                },
                PeerData {
                    id: "b".to_string(),
                    position: [40.0, 0.0, 40.0],
                    preferred_island_id: None,
                    island_id: Some("I1".to_string()),
                },
            ],
            max_peers: 200,
            center: [20.0, 0.0, 20.0],
            radius: 28.0,
            sequence_id: 1,
            transport_id: 0,
        }
    }

    #[test]
    fn test_report_json_shape() {
        let report = IslandsStatusReport::from_islands(&[island()]);
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "data": [{
                    "id": "I1",
                    "center": {"x": 20.0, "y": 0.0, "z": 20.0},
                    "maxPeers": 200,
                    "radius": 28.0,
                    "peers": ["a", "b"]
                }]
            })
        );
        assert_eq!(report.total_peers(), 2);
    }

    #[test]
    fn test_empty_report() {
        let report = IslandsStatusReport::from_islands(&[]);
        assert_eq!(report.to_json().unwrap(), r#"{"data":[]}"#);
    }
}
