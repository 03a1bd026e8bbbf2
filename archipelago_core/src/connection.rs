//! Connection strings handed to peers when they change island.
//!
//! The engine only needs "peer id + island id → connection string". Each
//! transport kind brings its own generator; the engine picks one by the
//! transport an island is bound to.

use std::collections::HashMap;
use std::sync::Arc;

/// Id of the always-available peer-to-peer transport.
pub const P2P_TRANSPORT_ID: u32 = 0;

/// Issues the connection string a peer uses to join an island.
pub trait ConnectionGenerator: Send + Sync {
    fn generate(&self, peer_id: &str, island_id: &str) -> String;
}

/// Peers connect directly to each other, no credentials needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct P2pConnectionGenerator;

impl ConnectionGenerator for P2pConnectionGenerator {
    fn generate(&self, peer_id: &str, island_id: &str) -> String {
        format!("p2p:{}.{}", island_id, peer_id)
    }
}

/// Room-based transports reachable under a base URL.
///
/// Credential issuance belongs to the transport itself; this generator
/// only produces the room address.
#[derive(Debug, Clone)]
pub struct RoomConnectionGenerator {
    scheme: String,
    url: String,
}

impl RoomConnectionGenerator {
    pub fn new(scheme: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            url: url.into(),
        }
    }
}

impl ConnectionGenerator for RoomConnectionGenerator {
    fn generate(&self, peer_id: &str, island_id: &str) -> String {
        format!("{}:{}/{}?peer={}", self.scheme, self.url, island_id, peer_id)
    }
}

/// Generators keyed by transport id.
#[derive(Clone)]
pub struct ConnectionRegistry {
    generators: HashMap<u32, Arc<dyn ConnectionGenerator>>,
}

impl ConnectionRegistry {
    /// Creates a registry that only knows the peer-to-peer transport.
    pub fn new() -> Self {
        let mut generators: HashMap<u32, Arc<dyn ConnectionGenerator>> = HashMap::new();
        generators.insert(P2P_TRANSPORT_ID, Arc::new(P2pConnectionGenerator));
        Self { generators }
    }

    /// Registers (or replaces) the generator for a transport.
    pub fn register(&mut self, transport_id: u32, generator: Arc<dyn ConnectionGenerator>) {
        self.generators.insert(transport_id, generator);
    }

    /// Returns the connection string for a peer, if the transport has a generator.
    ///
    /// Transports without one issue their credentials out of band.
    pub fn connection_string(&self, transport_id: u32, peer_id: &str, island_id: &str) -> Option<String> {
        self.generators
            .get(&transport_id)
            .map(|generator| generator.generate(peer_id, island_id))
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.generators.keys().collect();
        ids.sort();
        f.debug_struct("ConnectionRegistry").field("transports", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2p_is_always_registered() {
        let registry = ConnectionRegistry::new();
        assert_eq!(
            registry.connection_string(P2P_TRANSPORT_ID, "peer1", "I1").as_deref(),
            Some("p2p:I1.peer1")
        );
    }

    #[test]
    fn test_unknown_transport_has_no_connection_string() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.connection_string(7, "peer1", "I1"), None);
    }

    #[test]
    fn test_registered_generator_is_selected_by_transport() {
        let mut registry = ConnectionRegistry::new();
        registry.register(3, Arc::new(RoomConnectionGenerator::new("ws-room", "rooms.example")));

        assert_eq!(
            registry.connection_string(3, "peer1", "I9").as_deref(),
            Some("ws-room:rooms.example/I9?peer=peer1")
        );
    }
}
