//! Registry of connected transports.
//!
//! Transports come and go; the registry keeps the live table and hands the
//! engine a snapshot to replace its own copy wholesale.

use crate::controller::{ArchipelagoController, ControllerError};
use crate::island_engine::Transport;
use archipelago_env::{ArchipelagoContext, WorkerChannel};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    transports: BTreeMap<u32, Transport>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a transport (also used for heartbeats refreshing
    /// seat counts).
    pub fn on_transport_connected(&mut self, transport: Transport) {
        if !self.transports.contains_key(&transport.id) {
            info!(transport = transport.id, max_island_size = transport.max_island_size, "Transport connected");
        }
        self.transports.insert(transport.id, transport);
    }

    pub fn on_transport_disconnected(&mut self, id: u32) -> Option<Transport> {
        let removed = self.transports.remove(&id);
        if removed.is_some() {
            info!(transport = id, "Transport disconnected");
        }
        removed
    }

    pub fn get(&self, id: u32) -> Option<&Transport> {
        self.transports.get(&id)
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Current table, sorted by id.
    pub fn snapshot(&self) -> Vec<Transport> {
        self.transports.values().cloned().collect()
    }

    /// Queues the current table for the controller's next flush.
    pub fn publish<Ctx, Ch>(&self, controller: &ArchipelagoController<Ctx, Ch>) -> Result<(), ControllerError>
    where
        Ctx: ArchipelagoContext,
        Ch: WorkerChannel,
    {
        controller.set_transports(self.snapshot())
    }
}
