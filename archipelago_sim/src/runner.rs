//! Scenario runner - executes clustering scenarios against a live worker.

use crate::exporter::{SimEvent, SimExport};
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimError, SimWorld};

use archipelago_core::{ArchipelagoOptions, Transport, UpdatableOptions, P2P_TRANSPORT_ID};
use nalgebra::Vector3;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Peers held by the engine at the end
    pub final_peer_count: usize,

    /// Islands at the end
    pub final_island_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Batches flushed to the worker
    pub flushes: u64,

    /// Non-empty update notifications received
    pub update_batches: u64,

    /// Per-peer island changes across all notifications
    pub peer_changes: u64,

    /// Invariant sweeps performed
    pub invariant_checks: u64,

    /// Peers cleared because their heartbeat lapsed
    pub expired_peers: u64,

    /// Largest island count observed
    pub max_islands: usize,
}

/// Runs clustering scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of peers
    num_peers: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Duration of free-running scenarios in seconds
    max_duration_secs: f64,

    /// Where to write a frame export, if anywhere
    export_path: Option<String>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_peers: usize) -> Self {
        Self {
            seed,
            num_peers: num_peers.max(4),
            tick_rate_hz: 10,
            max_duration_secs: 30.0,
            export_path: None,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Records a frame per flush and writes it to `path` when done.
    pub fn with_export(mut self, path: impl Into<String>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if scenario.is_stress() {
            warn!("Stress scenario: {}", scenario.description());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build();

        let mut export = self
            .export_path
            .as_ref()
            .map(|_| SimExport::new(scenario.name(), self.seed));

        let result = match runtime {
            Ok(runtime) => runtime.block_on(self.run_scenario(scenario, export.as_mut())),
            Err(e) => Err(SimError::from(e)),
        };

        let result = result.unwrap_or_else(|e| {
            error!("Scenario {} aborted: {}", scenario.name(), e);
            self.aborted(scenario, e)
        });

        if let (Some(path), Some(export)) = (&self.export_path, export.as_mut()) {
            export.finalize(result.passed, result.failure_reason.clone());
            match export.write_to_file(path) {
                Ok(()) => info!("Exported {} frames to {}", export.frames.len(), path),
                Err(e) => error!("Failed to write export: {:?}", e),
            }
        }

        result
    }

    async fn run_scenario(
        &self,
        scenario: ScenarioId,
        export: Option<&mut SimExport>,
    ) -> Result<ScenarioResult, SimError> {
        match scenario {
            ScenarioId::ThreePeers => self.run_three_peers(export).await,
            ScenarioId::FlashMob => self.run_flash_mob(export).await,
            ScenarioId::Dispersal => self.run_dispersal(export).await,
            ScenarioId::Churn => self.run_churn(export).await,
            ScenarioId::TransportShuffle => self.run_transport_shuffle(export).await,
            ScenarioId::OptionsShift => self.run_options_shift(export).await,
            ScenarioId::PreferredIsland => self.run_preferred_island(export).await,
            // Stress scenarios
            ScenarioId::CapacityCrunch => self.run_capacity_crunch(export).await,
            ScenarioId::Stampede => self.run_stampede(export).await,
        }
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            tick_rate_hz: self.tick_rate_hz,
            flush_every_ticks: (self.tick_rate_hz as u64 * 2).max(1),
            ..SimConfig::default()
        }
    }

    async fn session<'a>(
        &self,
        scenario: ScenarioId,
        config: SimConfig,
        export: Option<&'a mut SimExport>,
    ) -> Result<Session<'a>, SimError> {
        let world = SimWorld::new(config)?;
        world.start().await?;

        Ok(Session {
            scenario,
            world,
            metrics: ScenarioMetrics::default(),
            export,
            events: Vec::new(),
            failure: None,
        })
    }

    fn aborted(&self, scenario: ScenarioId, error: SimError) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_peer_count: 0,
            final_island_count: 0,
            failure_reason: Some(error.to_string()),
            metrics: ScenarioMetrics::default(),
        }
    }

    /// ARC-001: ThreePeers - the canonical two-island layout.
    ///
    /// **Assertion**: (0,0,0) and (16,0,16) share an island, (90,0,90) is alone.
    async fn run_three_peers(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-001: ThreePeers - canonical layout");

        let config = SimConfig {
            options: ArchipelagoOptions::with_distances(64.0, 80.0),
            ..self.config()
        };
        let mut session = self.session(ScenarioId::ThreePeers, config, export).await?;

        session.world.crowd.set_jitter(0.0);
        let ids = vec![
            session.world.crowd.spawn(Vector3::new(0.0, 0.0, 0.0), Vector3::zeros()),
            session.world.crowd.spawn(Vector3::new(16.0, 0.0, 16.0), Vector3::zeros()),
            session.world.crowd.spawn(Vector3::new(90.0, 0.0, 90.0), Vector3::zeros()),
        ];

        session.advance_for(2.0).await?;

        let islands = session.world.controller().get_islands_count().await?;
        session.require(islands == 2, || format!("expected 2 islands, found {}", islands));

        let peers = session.world.controller().get_peers_data(ids.clone()).await?;
        let island_of = |id: &String| peers.get(id).and_then(|peer| peer.island_id.clone());
        session.require(
            island_of(&ids[0]).is_some() && island_of(&ids[0]) == island_of(&ids[1]),
            || "near peers were not grouped".to_string(),
        );
        session.require(island_of(&ids[2]) != island_of(&ids[0]), || {
            "far peer joined the near pair".to_string()
        });

        session.finish(self.seed).await
    }

    /// ARC-002: FlashMob - scattered groups converge on one square.
    ///
    /// **Assertion**: fewer islands after the walk than before it.
    async fn run_flash_mob(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-002: FlashMob - groups converge");

        let mut session = self.session(ScenarioId::FlashMob, self.config(), export).await?;
        session.world.crowd.set_jitter(0.2);

        let per_group = self.num_peers / 4;
        let corners = [(-200.0, -200.0), (200.0, -200.0), (-200.0, 200.0), (200.0, 200.0)];
        let mut everyone = Vec::new();
        for (x, z) in corners {
            everyone.extend(session.world.crowd.spawn_group(
                Vector3::new(x, 0.0, z),
                6.0,
                Vector3::zeros(),
                per_group,
            ));
        }

        session.advance_for(4.0).await?;
        let initial = session.world.controller().get_islands_count().await?;

        session.world.crowd.head_to(&everyone, Vector3::zeros(), 10.0);
        session.note("crowd heads to the square");
        session.advance_for(28.0).await?;

        session.world.crowd.halt();
        session.advance_for(4.0).await?;

        let merged = session.world.controller().get_islands_count().await?;
        debug!("Islands before={} after={}", initial, merged);
        session.require(merged < initial, || {
            format!("expected fewer than {} islands after converging, found {}", initial, merged)
        });

        session.finish(self.seed).await
    }

    /// ARC-003: Dispersal - a dense crowd walks outward.
    ///
    /// **Assertion**: more islands after the walk than before it.
    async fn run_dispersal(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-003: Dispersal - crowd splits");

        let mut session = self.session(ScenarioId::Dispersal, self.config(), export).await?;
        session.world.crowd.set_jitter(0.2);

        let everyone = session
            .world
            .crowd
            .spawn_group(Vector3::zeros(), 8.0, Vector3::zeros(), self.num_peers);

        session.advance_for(4.0).await?;
        let initial = session.world.controller().get_islands_count().await?;

        session.world.crowd.head_away(&everyone, Vector3::zeros(), 15.0);
        session.note("crowd disperses");
        session.advance_for(25.0).await?;

        let split = session.world.controller().get_islands_count().await?;
        debug!("Islands before={} after={}", initial, split);
        session.require(split > initial, || {
            format!("expected more than {} islands after dispersing, found {}", initial, split)
        });

        session.finish(self.seed).await
    }

    /// ARC-004: Churn - 30% of peers go silent.
    ///
    /// **Assertion**: once the heartbeat window passes the engine holds
    /// exactly the online peers.
    async fn run_churn(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-004: Churn - heartbeat expiry");

        let config = self.config();
        let timeout = config.heartbeat_timeout;
        let mut session = self.session(ScenarioId::Churn, config, export).await?;

        let per_group = self.num_peers / 3;
        let mut everyone = Vec::new();
        for x in [-150.0, 0.0, 150.0] {
            everyone.extend(session.world.crowd.spawn_group(
                Vector3::new(x, 0.0, 0.0),
                10.0,
                Vector3::zeros(),
                per_group,
            ));
        }
        session.world.crowd.wander(&everyone, 1.5);

        session.advance_for(6.0).await?;

        let dropped = session.world.crowd.disconnect_fraction(0.3);
        session.warn(format!("{} peers went offline", dropped.len()));
        session.advance_for(timeout.as_secs_f64() + 4.0).await?;

        let engine_peers = session.world.sync().await?;
        let online = session.world.crowd.online_count();
        session.require(engine_peers == online, || {
            format!("engine holds {} peers but {} are online", engine_peers, online)
        });

        session.finish(self.seed).await
    }

    /// ARC-005: TransportShuffle - transports connect and disconnect.
    ///
    /// **Assertion**: islands left on a vanished transport take no new peers.
    async fn run_transport_shuffle(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-005: TransportShuffle - transport churn");

        let mut session = self.session(ScenarioId::TransportShuffle, self.config(), export).await?;

        session.world.transports.on_transport_connected(transport(1, 30, 10));
        session.world.transports.on_transport_connected(transport(2, 100, 25));
        session.world.publish_transports()?;

        let per_group = self.num_peers / 3;
        let mut everyone = Vec::new();
        for z in [-120.0, 0.0, 120.0] {
            everyone.extend(session.world.crowd.spawn_group(
                Vector3::new(0.0, 0.0, z),
                12.0,
                Vector3::zeros(),
                per_group,
            ));
        }
        session.world.crowd.wander(&everyone, 2.0);

        session.advance_for(6.0).await?;

        let hosted = session
            .world
            .controller()
            .get_islands()
            .await?
            .iter()
            .filter(|island| island.transport_id != P2P_TRANSPORT_ID)
            .count();
        session.require(hosted > 0, || "no island was placed on a transport".to_string());

        session.world.transports.on_transport_disconnected(1);
        session.world.publish_transports()?;
        session.warn("transport 1 disconnected");
        session.advance_for(6.0).await?;

        session.world.transports.on_transport_connected(transport(3, 50, 20));
        session.world.publish_transports()?;
        session.note("transport 3 connected");
        session.advance_for(6.0).await?;

        let stale: Vec<String> = session
            .world
            .controller()
            .get_islands()
            .await?
            .into_iter()
            .filter(|island| island.transport_id == 1 && island.max_peers > 0)
            .map(|island| island.id)
            .collect();
        session.require(stale.is_empty(), || {
            format!("islands {:?} still accept peers on a vanished transport", stale)
        });

        session.finish(self.seed).await
    }

    /// ARC-006: OptionsShift - distances are halved mid-run.
    ///
    /// **Assertion**: islands only split; re-sending unchanged options
    /// produces no updates.
    async fn run_options_shift(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-006: OptionsShift - hot option update");

        let mut session = self.session(ScenarioId::OptionsShift, self.config(), export).await?;
        session.world.crowd.set_jitter(0.1);

        let per_group = self.num_peers / 3;
        for x in [-200.0, 0.0, 200.0] {
            session
                .world
                .crowd
                .spawn_group(Vector3::new(x, 0.0, 0.0), 20.0, Vector3::zeros(), per_group);
        }

        session.advance_for(4.0).await?;
        let initial = session.world.controller().get_islands_count().await?;

        session.world.modify_options(UpdatableOptions {
            join_distance: Some(32.0),
            leave_distance: Some(40.0),
            ..UpdatableOptions::default()
        })?;
        session.note("distances halved");
        session.advance_for(4.0).await?;

        let shifted = session.world.controller().get_islands_count().await?;
        session.require(shifted >= initial, || {
            format!("tighter distances reduced islands from {} to {}", initial, shifted)
        });

        // Nothing moved since the last sync, so a no-op update must be silent
        let before = session.world.update_batches();
        session.world.modify_options(UpdatableOptions::default())?;
        session.world.sync().await?;
        let after = session.world.update_batches();
        session.require(before == after, || {
            format!("unchanged options produced {} update batches", after - before)
        });

        session.finish(self.seed).await
    }

    /// ARC-007: PreferredIsland - a late group asks for a specific island.
    ///
    /// Two islands of 20 sit 100 units apart with room for 30 each; a group
    /// of 10 lands between them and votes for the second one.
    ///
    /// **Assertion**: every late peer ends up in the preferred island.
    async fn run_preferred_island(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-007: PreferredIsland - voting");

        let config = SimConfig {
            options: ArchipelagoOptions {
                max_peers_per_island: 30,
                ..ArchipelagoOptions::default()
            },
            ..self.config()
        };
        let mut session = self.session(ScenarioId::PreferredIsland, config, export).await?;
        session.world.crowd.set_jitter(0.0);

        session
            .world
            .crowd
            .spawn_group(Vector3::zeros(), 2.0, Vector3::zeros(), 20);
        let second = session
            .world
            .crowd
            .spawn_group(Vector3::new(100.0, 0.0, 0.0), 2.0, Vector3::zeros(), 20);

        session.advance_for(2.0).await?;

        let anchor = second.first().cloned().unwrap_or_default();
        let preferred = session
            .world
            .controller()
            .get_peer_data(&anchor)
            .await?
            .and_then(|peer| peer.island_id);
        let Some(preferred) = preferred else {
            session.require(false, || "second group has no island".to_string());
            return session.finish(self.seed).await;
        };

        let late = session
            .world
            .crowd
            .spawn_group(Vector3::new(50.0, 0.0, 0.0), 2.0, Vector3::zeros(), 10);
        session.world.crowd.set_preferred_island(&late, Some(preferred.clone()));
        session.note(format!("late group prefers {}", preferred));
        session.advance_for(2.0).await?;

        let peers = session.world.controller().get_peers_data(late).await?;
        let strays: Vec<&str> = peers
            .values()
            .filter(|peer| peer.island_id.as_deref() != Some(preferred.as_str()))
            .map(|peer| peer.id.as_str())
            .collect();
        session.require(peers.len() == 10 && strays.is_empty(), || {
            format!("late peers {:?} did not join {}", strays, preferred)
        });

        session.finish(self.seed).await
    }

    /// ARC-008: CapacityCrunch - islands capped at four under motion.
    ///
    /// **Assertion**: partition invariants hold at every flush.
    async fn run_capacity_crunch(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-008: CapacityCrunch - tiny islands");

        let config = SimConfig {
            options: ArchipelagoOptions {
                max_peers_per_island: 4,
                ..ArchipelagoOptions::default()
            },
            ..self.config()
        };
        let mut session = self.session(ScenarioId::CapacityCrunch, config, export).await?;

        let per_group = self.num_peers / 5;
        let mut everyone = Vec::new();
        for i in 0..5 {
            let angle = i as f64 * std::f64::consts::TAU / 5.0;
            everyone.extend(session.world.crowd.spawn_group(
                Vector3::new(angle.cos() * 100.0, 0.0, angle.sin() * 100.0),
                15.0,
                Vector3::zeros(),
                per_group,
            ));
        }
        session.world.crowd.wander(&everyone, 4.0);

        session.advance_for(self.max_duration_secs).await?;
        session.finish(self.seed).await
    }

    /// ARC-009: Stampede - a large crowd with rolling churn.
    ///
    /// **Assertion**: partition invariants and population hold at every flush.
    async fn run_stampede(&self, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        info!("ARC-009: Stampede - scale and churn");

        let mut session = self.session(ScenarioId::Stampede, self.config(), export).await?;

        let everyone = session.world.crowd.spawn_group(
            Vector3::zeros(),
            150.0,
            Vector3::zeros(),
            self.num_peers.max(400),
        );
        session.world.crowd.wander(&everyone, 3.0);

        let phase = 5.0;
        let phases = (self.max_duration_secs / phase).ceil().max(1.0) as usize;
        let mut offline: Vec<String> = Vec::new();
        for _ in 0..phases {
            session.advance_for(phase).await?;

            session.world.crowd.reconnect(&offline);
            offline = session.world.crowd.disconnect_fraction(0.1);
            session.note(format!("{} offline this phase", offline.len()));
        }

        session.finish(self.seed).await
    }
}

fn transport(id: u32, available_seats: i64, max_island_size: usize) -> Transport {
    Transport {
        id,
        available_seats,
        users_count: 0,
        max_island_size,
    }
}

/// One running scenario: the world plus what has been observed so far.
struct Session<'a> {
    scenario: ScenarioId,
    world: SimWorld,
    metrics: ScenarioMetrics,
    export: Option<&'a mut SimExport>,

    /// Events waiting for the next exported frame
    events: Vec<SimEvent>,

    /// First failure; later ones are only logged
    failure: Option<String>,
}

impl<'a> Session<'a> {
    /// Ticks for `secs` of virtual time, reporting and checking at every
    /// flush tick. Stops early once a failure is recorded.
    async fn advance_for(&mut self, secs: f64) -> Result<(), SimError> {
        let ticks = (secs * self.world.config.tick_rate_hz as f64).round() as u64;

        for _ in 0..ticks {
            if self.failure.is_some() {
                break;
            }

            self.world.tick();
            if self.world.is_flush_tick() {
                self.checkpoint().await?;
            }
        }
        Ok(())
    }

    async fn checkpoint(&mut self) -> Result<(), SimError> {
        self.world.report_positions()?;
        self.metrics.expired_peers += self.world.sweep()? as u64;

        self.world.sync().await?;
        self.metrics.flushes += 1;

        let violations = self.world.check().await?;
        self.metrics.invariant_checks += 1;
        if let Some(first) = violations.first() {
            for violation in &violations {
                warn!("t={:.1}s invariant violated: {}", self.world.time(), violation);
            }
            self.fail(format!(
                "t={:.1}s: {} ({} violations)",
                self.world.time(),
                first,
                violations.len()
            ));
        }

        let census = self.world.census().await?;
        self.metrics.max_islands = self.metrics.max_islands.max(census.data.len());

        if self.world.tick_count() % (self.world.config.tick_rate_hz as u64 * 10).max(1) == 0 {
            debug!(
                "  t={:.1}s | peers={} | islands={} | batches={}",
                self.world.time(),
                census.total_peers(),
                census.data.len(),
                self.world.update_batches()
            );
        }

        if let Some(export) = self.export.as_deref_mut() {
            let events = std::mem::take(&mut self.events);
            export.record(self.world.time(), self.world.crowd.online_walkers(), census, events);
        }
        Ok(())
    }

    fn require(&mut self, condition: bool, reason: impl FnOnce() -> String) {
        if !condition {
            self.fail(reason());
        }
    }

    fn fail(&mut self, reason: String) {
        if self.failure.is_none() {
            self.failure = Some(reason);
        }
    }

    fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("t={:.1}s {}", self.world.time(), message);
        self.events.push(SimEvent::info(message));
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("t={:.1}s {}", self.world.time(), message);
        self.events.push(SimEvent::warn(message));
    }

    /// Final barrier, shutdown and result assembly.
    async fn finish(mut self, seed: u64) -> Result<ScenarioResult, SimError> {
        let final_peer_count = self.world.sync().await?;
        let final_island_count = self.world.controller().get_islands_count().await?;

        self.metrics.update_batches = self.world.update_batches();
        self.metrics.peer_changes = self.world.peer_changes();
        self.world.shutdown().await?;

        Ok(ScenarioResult {
            scenario: self.scenario,
            seed,
            passed: self.failure.is_none(),
            total_ticks: self.world.tick_count(),
            final_time_secs: self.world.time(),
            final_peer_count,
            final_island_count,
            failure_reason: self.failure,
            metrics: self.metrics,
        })
    }
}
