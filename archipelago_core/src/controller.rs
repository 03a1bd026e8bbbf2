//! The "CONTROLLER" - Async Façade Over the Isolated Worker
//!
//! Callers push position reports and removals at any rate; the controller
//! buffers them per peer (last write wins) and flushes the buffer to the
//! worker on a fixed interval, but only while the worker is idle. Reads are
//! correlated request/response round-trips bounded by a timeout.
//!
//! ```text
//! set_peers_positions ─┐
//! clear_peers ─────────┼─> pending buffer ──(flush, idle only)──> worker
//! set_transports ──────┘                                            │
//!                                                                   │
//! subscribers <── islands-updated <─────────────────────────────────┤
//! get_* <──────── *-response (oneshot, timeout) <───────────────────┘
//! ```

use crate::island_engine::{Island, IslandUpdates, PeerData, PeerPositionChange, Transport};
use crate::options::{ArchipelagoOptions, OptionsError, UpdatableOptions};
use crate::protocol::{decode, encode, RequestId, WorkerRequest, WorkerResponse, WorkerStatus};
use crate::worker_runtime::spawn_worker;
use archipelago_env::{ArchipelagoContext, EnvError, Envelope, ThreadChannel, WorkerChannel};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Controller errors.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No response within the request timeout
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: RequestId, timeout_ms: u64 },

    /// The worker could not process the request
    #[error("Worker rejected request {request_id}: {message}")]
    Worker { request_id: RequestId, message: String },

    /// The worker answered with the wrong message kind
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The controller was disposed
    #[error("Controller disposed")]
    Disposed,

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),
}

/// Controller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// How often buffered updates are flushed (default: 2s)
    pub flush_interval: Duration,

    /// How long a correlated request may wait for its response (default: 10s)
    pub request_timeout: Duration,

    /// Initial clustering options handed to the worker
    pub options: ArchipelagoOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            options: ArchipelagoOptions::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ControllerError> {
        self.options.validate()?;
        Ok(())
    }
}

/// Handle returned by [`ArchipelagoController::subscribe_to_updates`].
pub type SubscriptionId = u64;

type UpdateSubscriber = Arc<dyn Fn(&IslandUpdates) + Send + Sync>;

#[derive(Debug, Clone)]
enum PeerUpdate {
    Position(PeerPositionChange),
    Clear,
}

/// Buffered mutations, one entry per peer in first-touched order.
#[derive(Debug, Default)]
struct PendingUpdates {
    order: Vec<String>,
    updates: HashMap<String, PeerUpdate>,
    transports: Option<Vec<Transport>>,
}

impl PendingUpdates {
    fn insert(&mut self, peer_id: String, update: PeerUpdate) {
        if self.updates.insert(peer_id.clone(), update).is_none() {
            self.order.push(peer_id);
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty() && self.transports.is_none()
    }

    fn into_request(mut self) -> WorkerRequest {
        let mut position_updates = Vec::new();
        let mut clear_updates = Vec::new();

        for peer_id in self.order {
            match self.updates.remove(&peer_id) {
                Some(PeerUpdate::Position(change)) => position_updates.push(change),
                Some(PeerUpdate::Clear) => clear_updates.push(peer_id),
                None => {}
            }
        }

        WorkerRequest::ApplyUpdates {
            position_updates,
            clear_updates,
            transports: self.transports,
        }
    }
}

#[derive(Default)]
struct ControllerState {
    pending: PendingUpdates,
    requests: HashMap<RequestId, oneshot::Sender<WorkerResponse>>,
    subscribers: Vec<(SubscriptionId, UpdateSubscriber)>,
    next_subscription: SubscriptionId,
    disposed: bool,
}

struct Shared<Ctx, Ch> {
    ctx: Arc<Ctx>,
    channel: Ch,
    config: ControllerConfig,
    state: Mutex<ControllerState>,
    status: watch::Sender<WorkerStatus>,
    next_request: AtomicU64,
}

/// Async façade over a clustering worker.
///
/// Cloning is cheap; all clones drive the same worker.
pub struct ArchipelagoController<Ctx, Ch> {
    inner: Arc<Shared<Ctx, Ch>>,
}

impl<Ctx, Ch> Clone for ArchipelagoController<Ctx, Ch> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Ctx: ArchipelagoContext> ArchipelagoController<Ctx, ThreadChannel> {
    /// Spawns a thread worker and attaches a controller to it.
    pub fn spawn(ctx: Arc<Ctx>, config: ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;
        let channel = spawn_worker(config.options.clone())?;
        Self::new(ctx, channel, config)
    }
}

impl<Ctx: ArchipelagoContext, Ch: WorkerChannel> ArchipelagoController<Ctx, Ch> {
    /// Attaches a controller to an already running worker and starts the
    /// receive and flush loops.
    pub fn new(ctx: Arc<Ctx>, channel: Ch, config: ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;

        let (status, _) = watch::channel(WorkerStatus::Unknown);
        let inner = Arc::new(Shared {
            ctx: Arc::clone(&ctx),
            channel,
            config,
            state: Mutex::new(ControllerState::default()),
            status,
            next_request: AtomicU64::new(0),
        });

        info!(
            worker = %inner.channel.worker_id(),
            flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
            "Archipelago controller started"
        );

        ctx.spawn("archipelago-receive", Shared::receive_loop(Arc::clone(&inner)));
        ctx.spawn("archipelago-flush", Shared::flush_loop(Arc::clone(&inner)));

        Ok(Self { inner })
    }

    // ------------------------------------------------------------------------
    // Buffered mutations (never suspend)
    // ------------------------------------------------------------------------

    /// Buffers position reports; a later report for the same peer replaces
    /// an earlier one (or a pending clear).
    pub fn set_peers_positions<I>(&self, changes: I) -> Result<(), ControllerError>
    where
        I: IntoIterator<Item = PeerPositionChange>,
    {
        let mut state = self.inner.active_state()?;
        for change in changes {
            state.pending.insert(change.id.clone(), PeerUpdate::Position(change));
        }
        Ok(())
    }

    /// Buffers peer removals.
    pub fn clear_peers<I, S>(&self, ids: I) -> Result<(), ControllerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.inner.active_state()?;
        for id in ids {
            state.pending.insert(id.into(), PeerUpdate::Clear);
        }
        Ok(())
    }

    /// Stores the latest transport table; it rides along with the next flush.
    pub fn set_transports(&self, transports: Vec<Transport>) -> Result<(), ControllerError> {
        let mut state = self.inner.active_state()?;
        state.pending.transports = Some(transports);
        Ok(())
    }

    /// Sends a partial options update. Fire-and-forget: the worker refuses
    /// invalid combinations on its side.
    pub fn modify_options(&self, updates: UpdatableOptions) -> Result<(), ControllerError> {
        self.inner.active_state()?;
        info!(updates = ?updates, "Sending options update");
        self.inner.send(&WorkerRequest::ApplyOptionsUpdate { updates })
    }

    /// Sends the buffer to the worker if it is idle and there is work.
    ///
    /// Returns true if a batch was sent.
    pub fn flush(&self) -> Result<bool, ControllerError> {
        self.inner.flush()
    }

    /// Number of peers with a buffered update.
    pub fn pending_updates_count(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn worker_status(&self) -> WorkerStatus {
        *self.inner.status.borrow()
    }

    /// Resolves once the worker has reported being idle at least once.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ControllerError> {
        let mut status = self.inner.status.subscribe();
        let ready = async move {
            status
                .wait_for(|status| *status != WorkerStatus::Unknown)
                .await
                .map(|_| ())
        };

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ControllerError::Disposed),
            Err(_) => Err(EnvError::Timeout(timeout.as_millis() as u64).into()),
        }
    }

    // ------------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------------

    /// Registers a callback for every `IslandUpdates` the worker emits.
    /// Callbacks run in registration order.
    pub fn subscribe_to_updates<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&IslandUpdates) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock_state();
        state.next_subscription += 1;
        let id = state.next_subscription;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the subscription was unknown.
    pub fn unsubscribe_from_updates(&self, id: SubscriptionId) -> bool {
        let mut state = self.inner.lock_state();
        let before = state.subscribers.len();
        state.subscribers.retain(|(subscription, _)| *subscription != id);
        state.subscribers.len() != before
    }

    // ------------------------------------------------------------------------
    // Correlated reads
    // ------------------------------------------------------------------------

    pub async fn get_islands(&self) -> Result<Vec<Island>, ControllerError> {
        self.call(
            |request_id| WorkerRequest::GetIslands { request_id },
            |response| match response {
                WorkerResponse::IslandsResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_island(&self, island_id: &str) -> Result<Option<Island>, ControllerError> {
        let island_id = island_id.to_string();
        self.call(
            |request_id| WorkerRequest::GetIsland { request_id, island_id },
            |response| match response {
                WorkerResponse::IslandResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_peer_data(&self, peer_id: &str) -> Result<Option<PeerData>, ControllerError> {
        let peer_id = peer_id.to_string();
        self.call(
            |request_id| WorkerRequest::GetPeerData { request_id, peer_id },
            |response| match response {
                WorkerResponse::PeerDataResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_peers_data(&self, peer_ids: Vec<String>) -> Result<BTreeMap<String, PeerData>, ControllerError> {
        self.call(
            |request_id| WorkerRequest::GetPeersData { request_id, peer_ids },
            |response| match response {
                WorkerResponse::PeersDataResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_peer_ids(&self) -> Result<Vec<String>, ControllerError> {
        self.call(
            |request_id| WorkerRequest::GetPeerIds { request_id },
            |response| match response {
                WorkerResponse::PeerIdsResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_peers_count(&self) -> Result<usize, ControllerError> {
        self.call(
            |request_id| WorkerRequest::GetPeersCount { request_id },
            |response| match response {
                WorkerResponse::CountResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    pub async fn get_islands_count(&self) -> Result<usize, ControllerError> {
        self.call(
            |request_id| WorkerRequest::GetIslandsCount { request_id },
            |response| match response {
                WorkerResponse::CountResponse { payload, .. } => Ok(payload),
                other => Err(other),
            },
        )
        .await
    }

    /// Asks the worker to shut down, waits for the acknowledgement (or the
    /// request timeout) and terminates it. Later calls fail with
    /// [`ControllerError::Disposed`].
    pub async fn dispose(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.inner.lock_state();
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
        }

        let acknowledged = self
            .inner
            .request(
                |request_id| WorkerRequest::DisposeRequest { request_id },
                |response| match response {
                    WorkerResponse::DisposeResponse { .. } => Ok(()),
                    other => Err(other),
                },
            )
            .await;

        if let Err(e) = acknowledged {
            warn!(error = %e, "Worker did not acknowledge dispose, terminating");
        }
        self.inner.channel.terminate();

        // Waiters still in the table see their sender dropped
        let abandoned = std::mem::take(&mut self.inner.lock_state().requests);
        info!(
            worker = %self.inner.channel.worker_id(),
            abandoned_requests = abandoned.len(),
            "Archipelago controller disposed"
        );

        Ok(())
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(RequestId) -> WorkerRequest,
        extract: impl FnOnce(WorkerResponse) -> Result<T, WorkerResponse>,
    ) -> Result<T, ControllerError> {
        self.inner.active_state()?;
        self.inner.request(build, extract).await
    }
}

impl<Ctx: ArchipelagoContext, Ch: WorkerChannel> Shared<Ctx, Ch> {
    /// Poison-tolerant lock; the state stays consistent between statements.
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn active_state(&self) -> Result<MutexGuard<'_, ControllerState>, ControllerError> {
        let state = self.lock_state();
        if state.disposed {
            return Err(ControllerError::Disposed);
        }
        Ok(state)
    }

    fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    fn send(&self, request: &WorkerRequest) -> Result<(), ControllerError> {
        let sent_at_ms = self.ctx.now().as_millis() as u64;
        let envelope = encode(request, sent_at_ms)?;
        self.channel.send(envelope)?;
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(RequestId) -> WorkerRequest,
        extract: impl FnOnce(WorkerResponse) -> Result<T, WorkerResponse>,
    ) -> Result<T, ControllerError> {
        let request_id = self.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.lock_state().requests.insert(request_id, tx);

        if let Err(e) = self.send(&build(request_id)) {
            self.lock_state().requests.remove(&request_id);
            return Err(e);
        }

        let timeout = self.config.request_timeout;
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Sender dropped: disposed, or the worker went away
                return Err(if self.is_disposed() {
                    ControllerError::Disposed
                } else {
                    EnvError::ChannelClosed.into()
                });
            }
            Err(_) => {
                self.lock_state().requests.remove(&request_id);
                debug!(request_id, "Request timed out");
                return Err(ControllerError::Timeout {
                    request_id,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if let WorkerResponse::WorkerRequestError { request_id, error } = response {
            return Err(ControllerError::Worker {
                request_id,
                message: error,
            });
        }

        extract(response).map_err(|other| ControllerError::UnexpectedResponse(format!("{:?}", other)))
    }

    fn flush(&self) -> Result<bool, ControllerError> {
        let request = {
            let mut state = self.active_state()?;
            if *self.status.borrow() != WorkerStatus::Idle || state.pending.is_empty() {
                return Ok(false);
            }
            std::mem::take(&mut state.pending).into_request()
        };

        if let WorkerRequest::ApplyUpdates {
            position_updates,
            clear_updates,
            ..
        } = &request
        {
            debug!(
                positions = position_updates.len(),
                clears = clear_updates.len(),
                "Flushing pending updates"
            );
        }

        // The worker confirms with its own status report
        self.status.send_replace(WorkerStatus::Working);
        self.send(&request)?;
        Ok(true)
    }

    async fn flush_loop(inner: Arc<Self>) {
        let interval = inner.config.flush_interval;

        while !inner.is_disposed() {
            let started = inner.ctx.now();
            if let Err(e) = inner.flush() {
                warn!(error = %e, "Flush failed");
            }

            let elapsed = inner.ctx.now().saturating_sub(started);
            let delay = interval.saturating_sub(elapsed).max(Duration::from_millis(1));
            inner.ctx.sleep(delay).await;
        }

        debug!("Flush loop stopped");
    }

    async fn receive_loop(inner: Arc<Self>) {
        while let Some(envelope) = inner.channel.recv().await {
            inner.handle_envelope(&envelope);
        }

        debug!(worker = %inner.channel.worker_id(), "Worker channel closed");
    }

    fn handle_envelope(&self, envelope: &Envelope) {
        let response: WorkerResponse = match decode(envelope) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, bytes = envelope.size(), "Dropping undecodable worker message");
                return;
            }
        };

        if let Some(request_id) = response.request_id() {
            match self.lock_state().requests.remove(&request_id) {
                Some(waiter) => {
                    // The waiter may have given up already
                    let _ = waiter.send(response);
                }
                None => debug!(request_id, "Dropping response nobody waits for"),
            }
            return;
        }

        if self.is_disposed() {
            return;
        }

        match response {
            WorkerResponse::WorkerStatus { status } => {
                self.status.send_replace(status);
            }
            WorkerResponse::IslandsUpdated { island_updates } => {
                let subscribers: Vec<UpdateSubscriber> = self
                    .lock_state()
                    .subscribers
                    .iter()
                    .map(|(_, subscriber)| Arc::clone(subscriber))
                    .collect();

                for subscriber in subscribers {
                    subscriber(&island_updates);
                }
            }
            other => debug!(response = ?other, "Ignoring uncorrelated worker message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::island_engine::IslandUpdate;
    use archipelago_env::{TokioContext, WorkerId};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::mpsc;

    fn config() -> ControllerConfig {
        ControllerConfig {
            flush_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            options: ArchipelagoOptions::default(),
        }
    }

    fn peer(id: &str, x: f64, y: f64, z: f64) -> PeerPositionChange {
        PeerPositionChange::new(id, [x, y, z])
    }

    async fn spawn_controller(config: ControllerConfig) -> ArchipelagoController<TokioContext, ThreadChannel> {
        let controller = ArchipelagoController::spawn(TokioContext::shared(), config).unwrap();
        controller.wait_until_ready(Duration::from_secs(5)).await.unwrap();
        controller
    }

    /// Polls until the worker has absorbed everything buffered so far.
    async fn settle(controller: &ArchipelagoController<TokioContext, ThreadChannel>, peers: usize) {
        for _ in 0..500 {
            if controller.pending_updates_count() == 0
                && controller.worker_status() == WorkerStatus::Idle
                && controller.get_peers_count().await.unwrap() == peers
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("worker did not settle");
    }

    fn sorted_groups(islands: &[Island]) -> Vec<Vec<String>> {
        let mut groups: Vec<Vec<String>> = islands
            .iter()
            .map(|island| {
                let mut ids: Vec<String> = island.peers.iter().map(|peer| peer.id.clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort();
        groups
    }

    // ------------------------------------------------------------------------
    // Against the real thread worker
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_forwards_positions_to_the_worker() {
        let controller = spawn_controller(config()).await;

        controller
            .set_peers_positions(vec![
                peer("1", 0.0, 0.0, 0.0),
                peer("2", 4.0, 0.0, 4.0),
                peer("3", 90.0, 0.0, 90.0),
            ])
            .unwrap();
        settle(&controller, 3).await;

        let islands = controller.get_islands().await.unwrap();
        assert_eq!(sorted_groups(&islands), vec![vec!["1", "2"], vec!["3"]]);
        assert_eq!(controller.get_islands_count().await.unwrap(), 2);

        controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_options_update_splits_islands() {
        let controller = spawn_controller(config()).await;
        controller
            .set_peers_positions(vec![peer("1", 0.0, 0.0, 0.0), peer("2", 4.0, 0.0, 4.0)])
            .unwrap();
        settle(&controller, 2).await;
        assert_eq!(controller.get_islands_count().await.unwrap(), 1);

        controller
            .modify_options(UpdatableOptions {
                join_distance: Some(4.0),
                leave_distance: Some(5.0),
                ..Default::default()
            })
            .unwrap();

        // Requests are answered in order, after the options update
        assert_eq!(controller.get_islands_count().await.unwrap(), 2);
        controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_clearing_peer_notifies_leave() {
        let controller = spawn_controller(config()).await;
        let received: Arc<Mutex<Vec<IslandUpdates>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        controller.subscribe_to_updates(move |updates| sink.lock().unwrap().push(updates.clone()));

        controller
            .set_peers_positions(vec![peer("1", 0.0, 0.0, 0.0), peer("2", 4.0, 0.0, 4.0)])
            .unwrap();
        settle(&controller, 2).await;
        controller.clear_peers(["1"]).unwrap();
        settle(&controller, 1).await;

        let received = received.lock().unwrap();
        let leave = received.iter().find_map(|updates| updates.get("1").filter(|update| update.is_leave()));
        assert_eq!(leave, Some(&IslandUpdate::Leave { island_id: "I1".to_string() }));

        drop(received);
        controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_specific_island_and_peer() {
        let controller = spawn_controller(config()).await;
        controller
            .set_peers_positions(vec![
                peer("1", 0.0, 0.0, 0.0),
                peer("2", 4.0, 0.0, 4.0).with_preferred_island("I7"),
            ])
            .unwrap();
        settle(&controller, 2).await;

        let island = controller.get_island("I1").await.unwrap().unwrap();
        assert_eq!(island.peers.len(), 2);
        assert!(controller.get_island("I404").await.unwrap().is_none());

        let data = controller.get_peer_data("2").await.unwrap().unwrap();
        assert_eq!(data.preferred_island_id.as_deref(), Some("I7"));
        assert_eq!(data.island_id.as_deref(), Some("I1"));

        let many = controller.get_peers_data(vec!["1".into(), "ghost".into()]).await.unwrap();
        assert_eq!(many.len(), 1);
        assert_eq!(controller.get_peer_ids().await.unwrap(), vec!["1", "2"]);

        controller.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn test_request_to_terminated_worker_times_out() {
        let controller = spawn_controller(ControllerConfig {
            request_timeout: Duration::from_millis(100),
            ..config()
        })
        .await;

        controller.inner.channel.terminate();
        let result = controller.get_island("I1").await;

        assert!(matches!(
            result,
            Err(ControllerError::Timeout { timeout_ms: 100, .. })
        ));
        assert!(controller.inner.lock_state().requests.is_empty());
    }

    #[tokio::test]
    async fn test_disposed_controller_rejects_calls() {
        let controller = spawn_controller(config()).await;

        controller.dispose().await.unwrap();

        assert!(matches!(controller.get_islands().await, Err(ControllerError::Disposed)));
        assert!(matches!(
            controller.set_peers_positions(vec![peer("1", 0.0, 0.0, 0.0)]),
            Err(ControllerError::Disposed)
        ));
        assert!(controller.dispose().await.is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ControllerConfig {
            options: ArchipelagoOptions::with_distances(100.0, 10.0),
            ..ControllerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ControllerError::InvalidOptions(_))));
    }

    // ------------------------------------------------------------------------
    // Against a scripted worker
    // ------------------------------------------------------------------------

    /// Records requests and replays whatever the test injects.
    #[derive(Clone)]
    struct ScriptedChannel {
        sent: Arc<Mutex<Vec<WorkerRequest>>>,
        inbound: mpsc::UnboundedSender<Envelope>,
        outbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
        terminated: Arc<AtomicBool>,
    }

    impl ScriptedChannel {
        fn new() -> Self {
            let (inbound, outbound) = mpsc::unbounded_channel();
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound,
                outbound: Arc::new(tokio::sync::Mutex::new(outbound)),
                terminated: Arc::new(AtomicBool::new(false)),
            }
        }

        fn reply(&self, response: &WorkerResponse) {
            self.inbound.send(encode(response, 0).unwrap()).unwrap();
        }

        fn sent(&self) -> Vec<WorkerRequest> {
            self.sent.lock().unwrap().clone()
        }

        async fn wait_for_requests(&self, count: usize) -> Vec<WorkerRequest> {
            for _ in 0..500 {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("expected {} requests, got {:?}", count, self.sent());
        }
    }

    #[async_trait]
    impl WorkerChannel for ScriptedChannel {
        fn send(&self, envelope: Envelope) -> Result<(), EnvError> {
            if self.terminated.load(Ordering::SeqCst) {
                return Err(EnvError::ChannelClosed);
            }
            self.sent.lock().unwrap().push(decode(&envelope)?);
            Ok(())
        }

        async fn recv(&self) -> Option<Envelope> {
            self.outbound.lock().await.recv().await
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }

        fn worker_id(&self) -> WorkerId {
            WorkerId::from_seed(1)
        }
    }

    fn scripted_controller() -> (ArchipelagoController<TokioContext, ScriptedChannel>, ScriptedChannel) {
        let channel = ScriptedChannel::new();
        let controller = ArchipelagoController::new(
            TokioContext::shared(),
            channel.clone(),
            ControllerConfig {
                // Flushes are driven by hand
                flush_interval: Duration::from_secs(3600),
                request_timeout: Duration::from_secs(5),
                options: ArchipelagoOptions::default(),
            },
        )
        .unwrap();
        (controller, channel)
    }

    async fn report_status(
        controller: &ArchipelagoController<TokioContext, ScriptedChannel>,
        channel: &ScriptedChannel,
        status: WorkerStatus,
    ) {
        channel.reply(&WorkerResponse::WorkerStatus { status });
        for _ in 0..500 {
            if controller.worker_status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("status {:?} never arrived", status);
    }

    fn applied_ids(request: &WorkerRequest) -> (Vec<String>, Vec<String>) {
        match request {
            WorkerRequest::ApplyUpdates {
                position_updates,
                clear_updates,
                ..
            } => (
                position_updates.iter().map(|change| change.id.clone()).collect(),
                clear_updates.clone(),
            ),
            other => panic!("expected apply-updates, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nothing_is_flushed_before_worker_is_ready() {
        let (controller, channel) = scripted_controller();

        controller.set_peers_positions(vec![peer("1", 0.0, 0.0, 0.0)]).unwrap();

        assert!(!controller.flush().unwrap());
        assert!(channel.sent().is_empty());
        assert_eq!(controller.pending_updates_count(), 1);
    }

    #[tokio::test]
    async fn test_readiness_waits_for_first_status() {
        let (controller, channel) = scripted_controller();

        let silent = controller.wait_until_ready(Duration::from_millis(50)).await;
        assert!(matches!(silent, Err(ControllerError::Env(EnvError::Timeout(50)))));

        channel.reply(&WorkerResponse::WorkerStatus { status: WorkerStatus::Working });
        controller.wait_until_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(controller.worker_status(), WorkerStatus::Working);
    }

    #[tokio::test]
    async fn test_updates_during_work_are_deferred_and_merged() {
        let (controller, channel) = scripted_controller();
        report_status(&controller, &channel, WorkerStatus::Idle).await;

        controller.set_peers_positions(vec![peer("1", 0.0, 0.0, 0.0)]).unwrap();
        assert!(controller.flush().unwrap());

        controller.set_peers_positions(vec![peer("2", 1.0, 0.0, 0.0)]).unwrap();
        controller.clear_peers(["3"]).unwrap();
        controller.set_peers_positions(vec![peer("3", 2.0, 0.0, 0.0)]).unwrap();
        controller.clear_peers(["2"]).unwrap();

        // Still working on the first batch
        assert!(!controller.flush().unwrap());
        assert_eq!(channel.sent().len(), 1);

        report_status(&controller, &channel, WorkerStatus::Idle).await;
        assert!(controller.flush().unwrap());

        let sent = channel.sent();
        assert_eq!(applied_ids(&sent[0]), (vec!["1".to_string()], vec![]));
        assert_eq!(
            applied_ids(&sent[1]),
            (vec!["3".to_string()], vec!["2".to_string()])
        );
        assert_eq!(controller.pending_updates_count(), 0);
    }

    #[tokio::test]
    async fn test_transports_ride_along_with_next_flush() {
        let (controller, channel) = scripted_controller();
        report_status(&controller, &channel, WorkerStatus::Idle).await;

        controller
            .set_transports(vec![Transport {
                id: 1,
                available_seats: 10,
                users_count: 0,
                max_island_size: 5,
            }])
            .unwrap();
        assert!(controller.flush().unwrap());

        match &channel.sent()[0] {
            WorkerRequest::ApplyUpdates { transports, .. } => {
                assert_eq!(transports.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_error_rejects_request() {
        let (controller, channel) = scripted_controller();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.get_islands().await }
        });

        let sent = channel.wait_for_requests(1).await;
        let request_id = sent[0].request_id().unwrap();
        channel.reply(&WorkerResponse::WorkerRequestError {
            request_id,
            error: "boom".to_string(),
        });

        let result = pending.await.unwrap();
        assert!(matches!(
            result,
            Err(ControllerError::Worker { message, .. }) if message == "boom"
        ));
    }

    #[tokio::test]
    async fn test_wrong_response_kind_is_reported() {
        let (controller, channel) = scripted_controller();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.get_peers_count().await }
        });

        let sent = channel.wait_for_requests(1).await;
        let request_id = sent[0].request_id().unwrap();
        channel.reply(&WorkerResponse::PeerIdsResponse {
            request_id,
            payload: Vec::new(),
        });

        assert!(matches!(
            pending.await.unwrap(),
            Err(ControllerError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_send_rejects_immediately() {
        let (controller, channel) = scripted_controller();
        channel.terminate();

        let result = controller.get_islands().await;

        assert!(matches!(result, Err(ControllerError::Env(EnvError::ChannelClosed))));
        assert!(controller.inner.lock_state().requests.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_run_in_order_until_unsubscribed() {
        let (controller, channel) = scripted_controller();
        let calls: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let calls = Arc::clone(&calls);
            controller.subscribe_to_updates(move |_| calls.lock().unwrap().push("first"))
        };
        {
            let calls = Arc::clone(&calls);
            controller.subscribe_to_updates(move |_| calls.lock().unwrap().push("second"));
        }

        channel.reply(&WorkerResponse::IslandsUpdated {
            island_updates: IslandUpdates::new(),
        });
        report_status(&controller, &channel, WorkerStatus::Idle).await;
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);

        assert!(controller.unsubscribe_from_updates(first));
        assert!(!controller.unsubscribe_from_updates(first));

        channel.reply(&WorkerResponse::IslandsUpdated {
            island_updates: IslandUpdates::new(),
        });
        report_status(&controller, &channel, WorkerStatus::Working).await;
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "second"]);
    }

    #[tokio::test]
    async fn test_correlation_ids_increase() {
        let (controller, channel) = scripted_controller();

        for _ in 0..3 {
            let controller = controller.clone();
            tokio::spawn(async move {
                let _ = controller.get_peer_ids().await;
            });
        }

        let mut ids: Vec<RequestId> = channel
            .wait_for_requests(3)
            .await
            .iter()
            .filter_map(WorkerRequest::request_id)
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
