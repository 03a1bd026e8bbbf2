//! Archipelago Deterministic Simulation Harness
//!
//! Drives the real controller and worker thread with a seeded crowd of
//! moving peers and checks the island partition after every flush.
//!
//! # Core Principle: Controlled Inputs
//!
//! - **Time**: Virtual clock advances only when the harness ticks
//! - **Batches**: Flushes happen on fixed ticks, never on a wall-clock timer
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        SimWorld                           │
//! │  ┌──────────┐  positions   ┌────────────┐  frames  ┌──────┐│
//! │  │  Crowd   │─────────────►│ Controller │─────────►│Worker││
//! │  │ (truth)  │  heartbeats  │ (buffer)   │◄─────────│thread││
//! │  └──────────┘              └─────┬──────┘ updates  └──────┘│
//! │                                  │ islands                │
//! │                           ┌──────▼──────┐                 │
//! │                           │ Invariants  │                 │
//! │                           └─────────────┘                 │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use archipelago_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 60).run(ScenarioId::FlashMob);
//! assert!(result.passed);
//! ```

mod context;
mod crowd;
mod exporter;
pub mod invariants;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use crowd::{Crowd, Walker};
pub use exporter::{SimEvent, SimExport, SimFrame, WalkerPosition};
pub use invariants::{check_partition, check_population, InvariantViolation};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimError, SimWorld};
