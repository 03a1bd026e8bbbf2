//! Isolated worker running the clustering engine.
//!
//! The engine lives on its own OS thread and is reachable only through the
//! message channel. Requests are handled strictly one after another, so the
//! engine needs no locking.

use crate::island_engine::{Archipelago, IslandUpdates};
use crate::options::{ArchipelagoOptions, UpdatableOptions};
use crate::protocol::{decode, encode, recover_request_id, WorkerRequest, WorkerResponse, WorkerStatus};
use archipelago_env::{channel_pair, EnvError, Envelope, ThreadChannel, WorkerEndpoint, WorkerId};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "archipelago-worker";

/// Starts a worker with a fresh engine and returns the host end of its channel.
pub fn spawn_worker(options: ArchipelagoOptions) -> Result<ThreadChannel, EnvError> {
    spawn_worker_with_id(options, WorkerId::new())
}

/// Like [`spawn_worker`] with a caller-chosen id (deterministic logs in simulation).
pub fn spawn_worker_with_id(options: ArchipelagoOptions, worker_id: WorkerId) -> Result<ThreadChannel, EnvError> {
    let (host, endpoint) = channel_pair(worker_id);

    std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || IslandWorker::new(endpoint, options).run())
        .map_err(EnvError::spawn)?;

    Ok(host)
}

/// Worker-side loop state.
struct IslandWorker {
    endpoint: WorkerEndpoint,
    archipelago: Archipelago,
    started_at: Instant,
}

impl IslandWorker {
    fn new(endpoint: WorkerEndpoint, options: ArchipelagoOptions) -> Self {
        Self {
            endpoint,
            archipelago: Archipelago::new(options),
            started_at: Instant::now(),
        }
    }

    fn run(mut self) {
        let worker_id = self.endpoint.worker_id();
        info!(worker = %worker_id, options = ?self.archipelago.options(), "Island worker started");
        self.report_status(WorkerStatus::Idle);

        while let Some(envelope) = self.endpoint.recv_blocking() {
            match decode::<WorkerRequest>(&envelope) {
                Ok(request) => {
                    if !self.handle(request) {
                        break;
                    }
                }
                Err(e) => self.reject_malformed(&envelope, e),
            }
        }

        if self.endpoint.is_terminated() {
            info!(worker = %worker_id, "Island worker terminated");
        } else {
            info!(worker = %worker_id, peers = self.archipelago.peers_count(), "Island worker stopped");
        }
    }

    /// Handles one request. Returns false when the loop should end.
    fn handle(&mut self, request: WorkerRequest) -> bool {
        let response = match request {
            WorkerRequest::ApplyUpdates {
                position_updates,
                clear_updates,
                transports,
            } => {
                self.report_status(WorkerStatus::Working);
                let started = Instant::now();

                let mut island_updates = IslandUpdates::new();
                if let Some(transports) = transports {
                    island_updates.extend(self.archipelago.set_transports(transports));
                }
                island_updates.extend(self.archipelago.remove_peers(&clear_updates));
                island_updates.extend(self.archipelago.apply_position_changes(&position_updates));

                debug!(
                    positions = position_updates.len(),
                    clears = clear_updates.len(),
                    changed = island_updates.len(),
                    islands = self.archipelago.islands_count(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Applied updates"
                );

                self.reply(&WorkerResponse::IslandsUpdated { island_updates });
                WorkerResponse::WorkerStatus {
                    status: WorkerStatus::Idle,
                }
            }

            WorkerRequest::ApplyOptionsUpdate { updates } => {
                self.report_status(WorkerStatus::Working);
                let island_updates = self.modify_options(&updates);
                self.reply(&WorkerResponse::IslandsUpdated { island_updates });
                WorkerResponse::WorkerStatus {
                    status: WorkerStatus::Idle,
                }
            }

            WorkerRequest::GetIslands { request_id } => WorkerResponse::IslandsResponse {
                request_id,
                payload: self.archipelago.get_islands(),
            },

            WorkerRequest::GetIsland { request_id, island_id } => WorkerResponse::IslandResponse {
                request_id,
                payload: self.archipelago.get_island(&island_id),
            },

            WorkerRequest::GetPeerData { request_id, peer_id } => WorkerResponse::PeerDataResponse {
                request_id,
                payload: self.archipelago.get_peer_data(&peer_id),
            },

            WorkerRequest::GetPeersData { request_id, peer_ids } => WorkerResponse::PeersDataResponse {
                request_id,
                payload: self.archipelago.get_peers_data(&peer_ids),
            },

            WorkerRequest::GetPeerIds { request_id } => WorkerResponse::PeerIdsResponse {
                request_id,
                payload: self.archipelago.peer_ids(),
            },

            WorkerRequest::GetPeersCount { request_id } => WorkerResponse::CountResponse {
                request_id,
                payload: self.archipelago.peers_count(),
            },

            WorkerRequest::GetIslandsCount { request_id } => WorkerResponse::CountResponse {
                request_id,
                payload: self.archipelago.islands_count(),
            },

            WorkerRequest::DisposeRequest { request_id } => {
                info!(worker = %self.endpoint.worker_id(), "Dispose requested");
                self.reply(&WorkerResponse::DisposeResponse { request_id });
                return false;
            }
        };

        self.reply(&response);
        true
    }

    fn modify_options(&mut self, updates: &UpdatableOptions) -> IslandUpdates {
        let candidate = self.archipelago.options().merged(updates);
        if let Err(e) = candidate.validate() {
            warn!(error = %e, "Rejected options update, keeping current options");
            return IslandUpdates::new();
        }

        let started = Instant::now();
        let island_updates = self.archipelago.modify_options(updates);
        info!(
            options = ?self.archipelago.options(),
            changed = island_updates.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Options updated"
        );
        island_updates
    }

    fn reject_malformed(&self, envelope: &Envelope, error: EnvError) {
        match recover_request_id(envelope) {
            Some(request_id) => {
                debug!(request_id, error = %error, "Rejecting malformed request");
                self.reply(&WorkerResponse::WorkerRequestError {
                    request_id,
                    error: error.to_string(),
                });
            }
            None => warn!(bytes = envelope.size(), error = %error, "Dropping malformed frame"),
        }
    }

    fn report_status(&self, status: WorkerStatus) {
        self.reply(&WorkerResponse::WorkerStatus { status });
    }

    fn reply(&self, response: &WorkerResponse) {
        let sent_at_ms = self.started_at.elapsed().as_millis() as u64;
        let result = encode(response, sent_at_ms).and_then(|envelope| self.endpoint.send(envelope));
        if let Err(e) = result {
            // The host is gone; the loop ends on the next receive
            debug!(error = %e, "Could not deliver worker response");
        }
    }
}
