//! SimWorld - The simulation harness container.
//!
//! Wires a seeded crowd to a real controller and worker thread. The
//! controller's own flush timer is parked on the virtual clock; the world
//! flushes by hand so every batch boundary is reproducible.

use crate::context::SimContext;
use crate::crowd::Crowd;
use crate::invariants::{check_population, InvariantViolation};

use archipelago_core::{
    ArchipelagoController, ArchipelagoOptions, ControllerConfig, ControllerError, HeartbeatTracker,
    IslandsStatusReport, TransportRegistry, UpdatableOptions,
};
use archipelago_core::worker_runtime::spawn_worker_with_id;
use archipelago_env::{ArchipelagoContext, EnvError, ThreadChannel, WorkerId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Keeps the background flush loop asleep for any realistic run.
const MANUAL_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long to wait for the worker's first status report.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that abort a run (as opposed to invariant failures).
#[derive(Debug, Error)]
pub enum SimError {
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("worker error: {0}")]
    Env(#[from] EnvError),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Ticks between flushes (default: 2s worth of ticks)
    pub flush_every_ticks: u64,

    /// Silence after which a peer is cleared
    pub heartbeat_timeout: Duration,

    /// Initial clustering options
    pub options: ArchipelagoOptions,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 10,
            flush_every_ticks: 20,
            heartbeat_timeout: Duration::from_secs(5),
            options: ArchipelagoOptions::default(),
        }
    }
}

/// The SimWorld - container for the entire simulation.
///
/// Must be created inside a Tokio runtime: the controller spawns its loops
/// on the current one.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Ground truth peers
    pub crowd: Crowd,

    /// Connected transports, published on demand
    pub transports: TransportRegistry,

    controller: ArchipelagoController<SimContext, ThreadChannel>,

    heartbeats: HeartbeatTracker,

    /// Options the worker is expected to run with
    options: ArchipelagoOptions,

    /// Non-empty update batches seen by the subscriber
    update_batches: Arc<AtomicU64>,

    /// Per-peer changes across all batches
    peer_changes: Arc<AtomicU64>,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld and its worker thread.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        // Derive separate seeds for different subsystems
        let context_seed = config.seed;
        let crowd_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let context = SimContext::shared(context_seed);
        let controller_config = ControllerConfig {
            flush_interval: MANUAL_FLUSH_INTERVAL,
            options: config.options.clone(),
            ..ControllerConfig::default()
        };
        controller_config.validate()?;

        let channel = spawn_worker_with_id(config.options.clone(), WorkerId::from_seed(config.seed))?;
        let controller = ArchipelagoController::new(Arc::clone(&context), channel, controller_config)?;

        let update_batches = Arc::new(AtomicU64::new(0));
        let peer_changes = Arc::new(AtomicU64::new(0));
        {
            let update_batches = Arc::clone(&update_batches);
            let peer_changes = Arc::clone(&peer_changes);
            controller.subscribe_to_updates(move |updates| {
                if !updates.is_empty() {
                    update_batches.fetch_add(1, Ordering::SeqCst);
                    peer_changes.fetch_add(updates.len() as u64, Ordering::SeqCst);
                }
            });
        }

        Ok(Self {
            heartbeats: HeartbeatTracker::new(config.heartbeat_timeout),
            options: config.options.clone(),
            config,
            context,
            crowd: Crowd::new(crowd_seed),
            transports: TransportRegistry::new(),
            controller,
            update_batches,
            peer_changes,
            tick_count: 0,
        })
    }

    /// Waits for the worker to come up.
    pub async fn start(&self) -> Result<(), SimError> {
        self.controller.wait_until_ready(READY_TIMEOUT).await?;
        Ok(())
    }

    /// Advances simulation by one tick.
    pub fn tick(&mut self) {
        let dt = 1.0 / self.config.tick_rate_hz as f64;

        self.context.advance_time(Duration::from_secs_f64(dt));
        self.crowd.step(dt);

        self.tick_count += 1;
    }

    /// True on ticks where the world should report and flush.
    pub fn is_flush_tick(&self) -> bool {
        self.tick_count % self.config.flush_every_ticks.max(1) == 0
    }

    /// Buffers a position report for every online peer and refreshes
    /// their heartbeats.
    pub fn report_positions(&mut self) -> Result<usize, SimError> {
        let now = self.context.now();
        let reports = self.crowd.position_reports();
        for report in &reports {
            self.heartbeats.record(report.id.clone(), now);
        }

        let count = reports.len();
        self.controller.set_peers_positions(reports)?;
        Ok(count)
    }

    /// Buffers removals for peers that went silent; returns how many.
    pub fn sweep(&mut self) -> Result<usize, SimError> {
        let expired = self.heartbeats.sweep(self.context.as_ref(), &self.controller)?;
        Ok(expired.len())
    }

    /// Flushes the buffer and waits until the worker has applied it.
    ///
    /// The worker answers requests in order, so a count query sent after
    /// the batch resolves only once the batch (and its update
    /// notification) has gone through.
    pub async fn sync(&self) -> Result<usize, SimError> {
        let sent = self.controller.flush()?;
        if !sent && self.controller.pending_updates_count() > 0 {
            debug!(status = ?self.controller.worker_status(), "Flush deferred");
        }

        Ok(self.controller.get_peers_count().await?)
    }

    /// Fetches the islands and checks the partition invariants.
    pub async fn check(&self) -> Result<Vec<InvariantViolation>, SimError> {
        let islands = self.controller.get_islands().await?;
        Ok(check_population(&islands, &self.options, self.heartbeats.tracked()))
    }

    /// Current island census.
    pub async fn census(&self) -> Result<IslandsStatusReport, SimError> {
        Ok(IslandsStatusReport::collect(&self.controller).await?)
    }

    /// Sends a partial options update and tracks the merged result.
    pub fn modify_options(&mut self, update: UpdatableOptions) -> Result<(), SimError> {
        self.options = self.options.merged(&update);
        self.controller.modify_options(update)?;
        Ok(())
    }

    /// Queues the registry's current table for the next flush.
    pub fn publish_transports(&self) -> Result<(), SimError> {
        self.transports.publish(&self.controller)?;
        Ok(())
    }

    /// Stops the worker.
    pub async fn shutdown(&self) -> Result<(), SimError> {
        self.controller.dispose().await?;
        Ok(())
    }

    pub fn controller(&self) -> &ArchipelagoController<SimContext, ThreadChannel> {
        &self.controller
    }

    pub fn options(&self) -> &ArchipelagoOptions {
        &self.options
    }

    /// Peers the harness believes the engine holds.
    pub fn tracked_peers(&self) -> usize {
        self.heartbeats.tracked()
    }

    pub fn update_batches(&self) -> u64 {
        self.update_batches.load(Ordering::SeqCst)
    }

    pub fn peer_changes(&self) -> u64 {
        self.peer_changes.load(Ordering::SeqCst)
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// Returns the current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
