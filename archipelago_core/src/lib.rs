//! Archipelago Core - Proximity-Based Island Clustering
//!
//! Groups peers moving in a 3D world into islands of nearby peers:
//! 1. **Engine**: incremental split/merge convergence under join/leave distances
//! 2. **Worker**: the engine isolated on its own thread, reached only by messages
//! 3. **Controller**: async façade that buffers updates and correlates queries

pub mod connection;
pub mod controller;
pub mod heartbeat;
pub mod id_generator;
pub mod island_engine;
pub mod island_geometry;
pub mod options;
pub mod protocol;
pub mod status_report;
pub mod transport_registry;
pub mod worker_runtime;

// Re-export key types for convenience
pub use connection::{ConnectionGenerator, ConnectionRegistry, P2pConnectionGenerator, P2P_TRANSPORT_ID};
pub use controller::{ArchipelagoController, ControllerConfig, ControllerError, SubscriptionId};
pub use heartbeat::HeartbeatTracker;
pub use id_generator::{IdGenerator, SequentialIdGenerator};
pub use island_engine::{Archipelago, Island, IslandUpdate, IslandUpdates, PeerData, PeerPositionChange, Transport};
pub use island_geometry::{IslandGeometry, Position3D};
pub use options::{ArchipelagoOptions, OptionsError, UpdatableOptions};
pub use protocol::{WorkerRequest, WorkerResponse, WorkerStatus};
pub use status_report::IslandsStatusReport;
pub use transport_registry::TransportRegistry;
pub use worker_runtime::spawn_worker;
