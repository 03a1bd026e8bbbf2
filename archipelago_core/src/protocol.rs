//! Host ↔ worker message protocol.
//!
//! Messages are JSON objects tagged by `"type"` and travel as `Envelope`
//! payload bytes, so the two sides never share memory.

use crate::island_engine::{Island, IslandUpdates, PeerData, PeerPositionChange, Transport};
use crate::options::UpdatableOptions;
use archipelago_env::{EnvError, Envelope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Correlation id pairing a request with its response.
pub type RequestId = u64;

/// Host → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Buffered mutations; clears are applied before positions
    #[serde(rename_all = "camelCase")]
    ApplyUpdates {
        position_updates: Vec<PeerPositionChange>,
        clear_updates: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transports: Option<Vec<Transport>>,
    },

    #[serde(rename_all = "camelCase")]
    ApplyOptionsUpdate { updates: UpdatableOptions },

    #[serde(rename_all = "camelCase")]
    GetIslands { request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    GetIsland { request_id: RequestId, island_id: String },

    #[serde(rename_all = "camelCase")]
    GetPeerData { request_id: RequestId, peer_id: String },

    #[serde(rename_all = "camelCase")]
    GetPeersData { request_id: RequestId, peer_ids: Vec<String> },

    #[serde(rename_all = "camelCase")]
    GetPeerIds { request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    GetPeersCount { request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    GetIslandsCount { request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    DisposeRequest { request_id: RequestId },
}

impl WorkerRequest {
    /// Correlation id, for requests that expect a response.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            WorkerRequest::ApplyUpdates { .. } | WorkerRequest::ApplyOptionsUpdate { .. } => None,
            WorkerRequest::GetIslands { request_id }
            | WorkerRequest::GetIsland { request_id, .. }
            | WorkerRequest::GetPeerData { request_id, .. }
            | WorkerRequest::GetPeersData { request_id, .. }
            | WorkerRequest::GetPeerIds { request_id }
            | WorkerRequest::GetPeersCount { request_id }
            | WorkerRequest::GetIslandsCount { request_id }
            | WorkerRequest::DisposeRequest { request_id } => Some(*request_id),
        }
    }
}

/// Worker lifecycle as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStatus {
    /// Nothing heard from the worker yet
    #[default]
    Unknown,
    Idle,
    Working,
}

/// Worker → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerResponse {
    #[serde(rename_all = "camelCase")]
    IslandsResponse { request_id: RequestId, payload: Vec<Island> },

    #[serde(rename_all = "camelCase")]
    IslandResponse {
        request_id: RequestId,
        #[serde(default)]
        payload: Option<Island>,
    },

    #[serde(rename_all = "camelCase")]
    PeerDataResponse {
        request_id: RequestId,
        #[serde(default)]
        payload: Option<PeerData>,
    },

    #[serde(rename_all = "camelCase")]
    PeersDataResponse {
        request_id: RequestId,
        payload: BTreeMap<String, PeerData>,
    },

    #[serde(rename_all = "camelCase")]
    PeerIdsResponse { request_id: RequestId, payload: Vec<String> },

    #[serde(rename_all = "camelCase")]
    CountResponse { request_id: RequestId, payload: usize },

    #[serde(rename_all = "camelCase")]
    DisposeResponse { request_id: RequestId },

    #[serde(rename_all = "camelCase")]
    WorkerStatus { status: WorkerStatus },

    #[serde(rename_all = "camelCase")]
    WorkerRequestError { request_id: RequestId, error: String },

    #[serde(rename_all = "camelCase")]
    IslandsUpdated { island_updates: IslandUpdates },
}

impl WorkerResponse {
    /// Correlation id, for responses that settle a pending request.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            WorkerResponse::IslandsResponse { request_id, .. }
            | WorkerResponse::IslandResponse { request_id, .. }
            | WorkerResponse::PeerDataResponse { request_id, .. }
            | WorkerResponse::PeersDataResponse { request_id, .. }
            | WorkerResponse::PeerIdsResponse { request_id, .. }
            | WorkerResponse::CountResponse { request_id, .. }
            | WorkerResponse::DisposeResponse { request_id }
            | WorkerResponse::WorkerRequestError { request_id, .. } => Some(*request_id),
            WorkerResponse::WorkerStatus { .. } | WorkerResponse::IslandsUpdated { .. } => None,
        }
    }
}

/// Serializes a message into an envelope stamped with `sent_at_ms`.
pub fn encode<T: Serialize>(message: &T, sent_at_ms: u64) -> Result<Envelope, EnvError> {
    let payload = serde_json::to_vec(message).map_err(|e| EnvError::serialization(e.to_string()))?;
    Ok(Envelope::new(payload, sent_at_ms))
}

/// Parses an envelope payload.
pub fn decode<T: for<'de> Deserialize<'de>>(envelope: &Envelope) -> Result<T, EnvError> {
    serde_json::from_slice(&envelope.payload).map_err(|e| EnvError::serialization(e.to_string()))
}

/// Best-effort recovery of the `requestId` of a frame that failed to decode.
pub fn recover_request_id(envelope: &Envelope) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_slice(&envelope.payload).ok()?;
    value.get("requestId")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_updates_wire_shape() {
        let request = WorkerRequest::ApplyUpdates {
            position_updates: vec![PeerPositionChange::new("1", [0.0, 0.0, 0.0])],
            clear_updates: vec!["2".to_string()],
            transports: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "apply-updates");
        assert_eq!(value["positionUpdates"][0]["id"], "1");
        assert_eq!(value["clearUpdates"], json!(["2"]));
        assert!(value.get("transports").is_none());
    }

    #[test]
    fn test_request_from_wire() {
        let request: WorkerRequest =
            serde_json::from_value(json!({"type": "get-island", "requestId": 7, "islandId": "I1"})).unwrap();

        assert_eq!(
            request,
            WorkerRequest::GetIsland { request_id: 7, island_id: "I1".to_string() }
        );
        assert_eq!(request.request_id(), Some(7));
    }

    #[test]
    fn test_status_wire_shape() {
        let value = serde_json::to_value(WorkerResponse::WorkerStatus { status: WorkerStatus::Working }).unwrap();
        assert_eq!(value, json!({"type": "worker-status", "status": "working"}));
    }

    #[test]
    fn test_missing_island_is_null_payload() {
        let response: WorkerResponse =
            serde_json::from_value(json!({"type": "island-response", "requestId": 3, "payload": null})).unwrap();
        assert_eq!(response, WorkerResponse::IslandResponse { request_id: 3, payload: None });
    }

    #[test]
    fn test_envelope_round_trip_keeps_timestamp() {
        let envelope = encode(&WorkerRequest::GetPeerIds { request_id: 1 }, 1500).unwrap();
        assert_eq!(envelope.sent_at_ms, 1500);

        let decoded: WorkerRequest = decode(&envelope).unwrap();
        assert_eq!(decoded, WorkerRequest::GetPeerIds { request_id: 1 });
    }

    #[test]
    fn test_request_id_recovered_from_unknown_message() {
        let envelope = Envelope::new(br#"{"type":"get-everything","requestId":42}"#.to_vec(), 0);

        assert!(decode::<WorkerRequest>(&envelope).is_err());
        assert_eq!(recover_request_id(&envelope), Some(42));
        assert_eq!(recover_request_id(&Envelope::new(b"not json".to_vec(), 0)), None);
    }
}
