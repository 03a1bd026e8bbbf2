//! The "ISLAND" Engine - Incremental Spatial Clustering
//!
//! Keeps every tracked peer in exactly one island and re-partitions after
//! each mutation with a two-phase convergence pass:
//! 1. Split: islands whose members drifted beyond the leave distance break
//!    into connected components; the largest keeps the island's identity.
//! 2. Merge: islands within join distance of each other (footprint overlap
//!    AND at least one close member pair) merge, biggest and oldest first,
//!    honouring capacity and the peers' preferred-island votes.
//!
//! The engine is a synchronous state machine with no I/O. It never fails:
//! operations on unknown ids are no-ops.

use crate::connection::{ConnectionRegistry, P2P_TRANSPORT_ID};
use crate::id_generator::{IdGenerator, SequentialIdGenerator};
use crate::island_geometry::{
    geometries_overlap, island_geometry, within_distance, IslandGeometry, Position3D,
};
use crate::options::{ArchipelagoOptions, UpdatableOptions};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// DATA MODEL
// ============================================================================

/// A tracked peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerData {
    pub id: String,

    pub position: Position3D,

    /// Merge hint: the island this peer would like to end up in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_island_id: Option<String>,

    /// Current island, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub island_id: Option<String>,
}

/// A position report for one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPositionChange {
    pub id: String,

    pub position: Position3D,

    /// Three states: absent leaves the stored preference alone,
    /// `Some(None)` (wire `null`) clears it, `Some(Some(id))` sets it.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub preferred_island_id: Option<Option<String>>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl PeerPositionChange {
    /// A report that leaves the peer's preferred island untouched.
    pub fn new(id: impl Into<String>, position: Position3D) -> Self {
        Self {
            id: id.into(),
            position,
            preferred_island_id: None,
        }
    }

    pub fn with_preferred_island(mut self, island_id: impl Into<String>) -> Self {
        self.preferred_island_id = Some(Some(island_id.into()));
        self
    }

    pub fn clearing_preferred_island(mut self) -> Self {
        self.preferred_island_id = Some(None);
        self
    }
}

/// A seat provider islands can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transport {
    pub id: u32,

    /// Seats the transport can still hand out (negative = unlimited)
    pub available_seats: i64,

    pub users_count: i64,

    /// Capacity of each island hosted on this transport
    pub max_island_size: usize,
}

/// Snapshot of an island as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Island {
    pub id: String,
    pub peers: Vec<PeerData>,
    pub max_peers: usize,
    pub center: Position3D,
    pub radius: f64,
    pub sequence_id: u64,
    pub transport_id: u32,
}

impl Island {
    pub fn peer_ids(&self) -> Vec<&str> {
        self.peers.iter().map(|peer| peer.id.as_str()).collect()
    }
}

/// How one peer's island membership changed during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum IslandUpdate {
    #[serde(rename_all = "camelCase")]
    ChangeTo {
        island_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_island_id: Option<String>,
        transport_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conn_str: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Leave { island_id: String },
}

impl IslandUpdate {
    /// The island the peer moved to (or left).
    pub fn island_id(&self) -> &str {
        match self {
            IslandUpdate::ChangeTo { island_id, .. } | IslandUpdate::Leave { island_id } => island_id,
        }
    }

    pub fn is_leave(&self) -> bool {
        matches!(self, IslandUpdate::Leave { .. })
    }
}

/// Per-peer updates produced by one convergence pass, keyed by peer id.
pub type IslandUpdates = BTreeMap<String, IslandUpdate>;

// ============================================================================
// INTERNAL STATE
// ============================================================================

#[derive(Debug)]
struct IslandState {
    id: String,
    peer_ids: Vec<String>,
    max_peers: usize,
    sequence_id: u64,
    transport_id: u32,
    geometry: Option<IslandGeometry>,
    geometry_dirty: bool,
}

impl IslandState {
    fn mark_geometry_dirty(&mut self) {
        self.geometry_dirty = true;
    }

    fn free_seats(&self) -> usize {
        self.max_peers.saturating_sub(self.peer_ids.len())
    }

    /// Returns the cached geometry, recomputing it first when membership or
    /// positions changed since the last computation.
    fn recompute_geometry_if_dirty(&mut self, peers: &HashMap<String, PeerData>) -> IslandGeometry {
        if self.peer_ids.is_empty() {
            return self.geometry.unwrap_or_default();
        }

        match self.geometry {
            Some(geometry) if !self.geometry_dirty => geometry,
            _ => {
                let geometry = island_geometry(
                    self.peer_ids
                        .iter()
                        .filter_map(|id| peers.get(id))
                        .map(|peer| &peer.position),
                );
                self.geometry = Some(geometry);
                self.geometry_dirty = false;
                geometry
            }
        }
    }
}

/// Islands touched by the current pass, in the order they were touched.
#[derive(Debug, Default)]
struct AffectedIslands {
    order: Vec<String>,
    members: HashSet<String>,
}

impl AffectedIslands {
    fn insert(&mut self, island_id: &str) {
        if self.members.insert(island_id.to_string()) {
            self.order.push(island_id.to_string());
        }
    }

    fn remove(&mut self, island_id: &str) {
        if self.members.remove(island_id) {
            self.order.retain(|id| id != island_id);
        }
    }

    fn get(&self, index: usize) -> Option<&String> {
        self.order.get(index)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Owns peers, islands and the transport table.
pub struct Archipelago {
    options: ArchipelagoOptions,
    peers: HashMap<String, PeerData>,
    islands: HashMap<String, IslandState>,
    transports: Vec<Transport>,
    island_ids: Box<dyn IdGenerator>,
    current_sequence: u64,
    connections: ConnectionRegistry,
}

impl Archipelago {
    /// Creates an engine issuing island ids `I1`, `I2`, ...
    pub fn new(options: ArchipelagoOptions) -> Self {
        Self::with_id_generator(options, Box::new(SequentialIdGenerator::default()))
    }

    pub fn with_id_generator(options: ArchipelagoOptions, island_ids: Box<dyn IdGenerator>) -> Self {
        Self {
            options,
            peers: HashMap::new(),
            islands: HashMap::new(),
            transports: Vec::new(),
            island_ids,
            current_sequence: 0,
            connections: ConnectionRegistry::new(),
        }
    }

    /// Replaces the connection generators used for `ChangeTo` updates.
    pub fn with_connections(mut self, connections: ConnectionRegistry) -> Self {
        self.connections = connections;
        self
    }

    pub fn options(&self) -> &ArchipelagoOptions {
        &self.options
    }

    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Applies position reports and converges.
    ///
    /// Unknown peers are created in a solo island; known peers move and mark
    /// their island for re-evaluation.
    pub fn apply_position_changes(&mut self, changes: &[PeerPositionChange]) -> IslandUpdates {
        let mut updates = IslandUpdates::new();
        let mut affected = AffectedIslands::default();

        for change in changes {
            if let Some(peer) = self.peers.get_mut(&change.id) {
                peer.position = change.position;

                if let Some(preferred) = &change.preferred_island_id {
                    peer.preferred_island_id = preferred.clone();
                }

                if let Some(island_id) = &peer.island_id {
                    if let Some(island) = self.islands.get_mut(island_id) {
                        island.mark_geometry_dirty();
                        affected.insert(island_id);
                    }
                }
            } else {
                self.peers.insert(
                    change.id.clone(),
                    PeerData {
                        id: change.id.clone(),
                        position: change.position,
                        preferred_island_id: change.preferred_island_id.clone().flatten(),
                        island_id: None,
                    },
                );
                self.create_island(vec![change.id.clone()], &mut updates, &mut affected);
            }
        }

        self.update_islands(&mut updates, &mut affected);
        updates
    }

    /// Forgets peers and converges what is left of their islands.
    pub fn remove_peers<S: AsRef<str>>(&mut self, ids: &[S]) -> IslandUpdates {
        let mut updates = IslandUpdates::new();
        let mut affected = AffectedIslands::default();

        for id in ids {
            let id = id.as_ref();
            let Some(peer) = self.peers.remove(id) else {
                continue;
            };
            let Some(island_id) = peer.island_id else {
                continue;
            };

            if self.clear_peer_from_island(id, &island_id) {
                affected.insert(&island_id);
            } else {
                affected.remove(&island_id);
            }
            updates.insert(id.to_string(), IslandUpdate::Leave { island_id });
        }

        self.update_islands(&mut updates, &mut affected);
        updates
    }

    /// Replaces the transport table.
    ///
    /// Islands bound to a transport that disappeared are capped to zero
    /// capacity so nobody new is routed there; their current members are
    /// left in place.
    pub fn set_transports(&mut self, transports: Vec<Transport>) -> IslandUpdates {
        let live: HashSet<u32> = transports.iter().map(|transport| transport.id).collect();

        for island in self.islands.values_mut() {
            if island.transport_id != P2P_TRANSPORT_ID && !live.contains(&island.transport_id) {
                island.max_peers = 0;
            }
        }

        self.transports = transports;
        IslandUpdates::new()
    }

    /// Hot-swaps tunables and re-evaluates every island.
    pub fn modify_options(&mut self, update: &UpdatableOptions) -> IslandUpdates {
        self.options = self.options.merged(update);

        let mut updates = IslandUpdates::new();
        let mut affected = AffectedIslands::default();
        for island_id in self.island_ids_by_sequence() {
            affected.insert(&island_id);
        }

        self.update_islands(&mut updates, &mut affected);
        updates
    }

    // ------------------------------------------------------------------------
    // Read accessors (copies; geometry caches are refreshed on the way out)
    // ------------------------------------------------------------------------

    /// All islands, oldest first.
    pub fn get_islands(&mut self) -> Vec<Island> {
        self.island_ids_by_sequence()
            .iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    pub fn get_island(&mut self, id: &str) -> Option<Island> {
        self.snapshot(id)
    }

    pub fn get_peer_data(&self, id: &str) -> Option<PeerData> {
        self.peers.get(id).cloned()
    }

    /// Data for the known peers among `ids`.
    pub fn get_peers_data<S: AsRef<str>>(&self, ids: &[S]) -> BTreeMap<String, PeerData> {
        ids.iter()
            .filter_map(|id| self.peers.get(id.as_ref()))
            .map(|peer| (peer.id.clone(), peer.clone()))
            .collect()
    }

    /// Known peer ids, sorted.
    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn peers_count(&self) -> usize {
        self.peers.len()
    }

    pub fn islands_count(&self) -> usize {
        self.islands.len()
    }

    fn snapshot(&mut self, id: &str) -> Option<Island> {
        let peers = &self.peers;
        let island = self.islands.get_mut(id)?;
        let geometry = island.recompute_geometry_if_dirty(peers);

        Some(Island {
            id: island.id.clone(),
            peers: island
                .peer_ids
                .iter()
                .filter_map(|peer_id| peers.get(peer_id).cloned())
                .collect(),
            max_peers: island.max_peers,
            center: geometry.center,
            radius: geometry.radius,
            sequence_id: island.sequence_id,
            transport_id: island.transport_id,
        })
    }

    fn island_ids_by_sequence(&self) -> Vec<String> {
        let mut islands: Vec<(u64, &String)> = self
            .islands
            .values()
            .map(|island| (island.sequence_id, &island.id))
            .collect();
        islands.sort_unstable_by_key(|(sequence_id, _)| *sequence_id);
        islands.into_iter().map(|(_, id)| id.clone()).collect()
    }

    // ------------------------------------------------------------------------
    // Convergence
    // ------------------------------------------------------------------------

    fn update_islands(&mut self, updates: &mut IslandUpdates, affected: &mut AffectedIslands) {
        self.check_split_islands(updates, affected);
        self.check_merge_islands(updates, affected);
    }

    fn check_split_islands(&mut self, updates: &mut IslandUpdates, affected: &mut AffectedIslands) {
        // Islands spun off during the loop are appended and visited as well
        let mut index = 0;
        while let Some(island_id) = affected.get(index).cloned() {
            index += 1;
            self.check_split_island(&island_id, updates, affected);
        }
    }

    fn check_split_island(
        &mut self,
        island_id: &str,
        updates: &mut IslandUpdates,
        affected: &mut AffectedIslands,
    ) {
        let mut groups = match self.islands.get(island_id) {
            Some(island) => self.connected_components(&island.peer_ids, self.options.leave_distance),
            None => return,
        };

        if groups.len() <= 1 {
            return;
        }

        // Ties go to the group holding the earliest member
        let biggest = groups
            .iter()
            .enumerate()
            .fold(0, |best, (index, group)| {
                if group.len() > groups[best].len() {
                    index
                } else {
                    best
                }
            });
        let biggest_group = groups.remove(biggest);

        if let Some(island) = self.islands.get_mut(island_id) {
            island.peer_ids = biggest_group;
            island.mark_geometry_dirty();
        }

        for group in groups {
            self.create_island(group, updates, affected);
        }
    }

    /// Partitions members into maximal groups where every member is
    /// transitively within `distance` of the others.
    ///
    /// Groups are ordered by their earliest member and keep member order.
    fn connected_components(&self, members: &[String], distance: f64) -> Vec<Vec<String>> {
        let positions: Vec<(&String, Position3D)> = members
            .iter()
            .filter_map(|id| self.peers.get(id).map(|peer| (id, peer.position)))
            .collect();

        let mut visited = vec![false; positions.len()];
        let mut components = Vec::new();

        for start in 0..positions.len() {
            if visited[start] {
                continue;
            }
            visited[start] = true;

            let mut component = vec![start];
            let mut cursor = 0;
            while cursor < component.len() {
                let current = component[cursor];
                cursor += 1;

                for candidate in 0..positions.len() {
                    if !visited[candidate]
                        && within_distance(&positions[current].1, &positions[candidate].1, distance)
                    {
                        visited[candidate] = true;
                        component.push(candidate);
                    }
                }
            }

            component.sort_unstable();
            components.push(
                component
                    .into_iter()
                    .map(|index| positions[index].0.clone())
                    .collect(),
            );
        }

        components
    }

    fn check_merge_islands(&mut self, updates: &mut IslandUpdates, affected: &AffectedIslands) {
        let join_distance = self.options.join_distance;
        let mut processed: HashSet<String> = HashSet::new();

        for island_id in &affected.order {
            if processed.contains(island_id) || !self.islands.contains_key(island_id) {
                continue;
            }

            let batch = self.reachable_islands(island_id, join_distance);
            if batch.len() > 1 {
                processed.extend(batch.iter().cloned());
                self.merge_islands(batch, updates);
            }
        }
    }

    /// Every island reachable from `seed` through the join relation, seed first.
    fn reachable_islands(&mut self, seed: &str, distance: f64) -> Vec<String> {
        let candidates = self.island_ids_by_sequence();
        let mut batch = vec![seed.to_string()];
        let mut in_batch: HashSet<String> = HashSet::from([seed.to_string()]);

        let mut cursor = 0;
        while cursor < batch.len() {
            let current = batch[cursor].clone();
            cursor += 1;

            for other in &candidates {
                if !in_batch.contains(other) && self.intersect_islands(&current, other, distance) {
                    in_batch.insert(other.clone());
                    batch.push(other.clone());
                }
            }
        }

        batch
    }

    fn geometry_of(&mut self, island_id: &str) -> Option<IslandGeometry> {
        let peers = &self.peers;
        self.islands
            .get_mut(island_id)
            .map(|island| island.recompute_geometry_if_dirty(peers))
    }

    /// Footprints overlap AND some member pair is within `distance`.
    fn intersect_islands(&mut self, a: &str, b: &str, distance: f64) -> bool {
        let (Some(geometry_a), Some(geometry_b)) = (self.geometry_of(a), self.geometry_of(b)) else {
            return false;
        };
        if !geometries_overlap(&geometry_a, &geometry_b, distance) {
            return false;
        }

        let (Some(island_a), Some(island_b)) = (self.islands.get(a), self.islands.get(b)) else {
            return false;
        };

        let positions_b: Vec<&Position3D> = island_b
            .peer_ids
            .iter()
            .filter_map(|id| self.peers.get(id))
            .map(|peer| &peer.position)
            .collect();

        island_a
            .peer_ids
            .iter()
            .filter_map(|id| self.peers.get(id))
            .any(|peer| {
                positions_b
                    .iter()
                    .any(|other| within_distance(&peer.position, other, distance))
            })
    }

    /// Merges the batch until no kept island can absorb a neighbour.
    ///
    /// An island only merges into one it shares a member pair with under
    /// join distance. A merge can make two kept islands neighbours, so the
    /// survivors go round again until a pass changes nothing.
    fn merge_islands(&mut self, batch: Vec<String>, updates: &mut IslandUpdates) {
        let mut batch = batch;
        loop {
            let before = batch.len();
            batch = self.merge_pass(batch, updates);
            if batch.len() == before || batch.len() < 2 {
                break;
            }
        }
    }

    /// One biggest-first pass; returns the islands that survived it.
    fn merge_pass(&mut self, batch: Vec<String>, updates: &mut IslandUpdates) -> Vec<String> {
        let join_distance = self.options.join_distance;
        let mut candidates: Vec<(usize, u64, String)> = batch
            .into_iter()
            .filter_map(|id| {
                self.islands
                    .get(&id)
                    .map(|island| (island.peer_ids.len(), island.sequence_id, id))
            })
            .collect();
        // Biggest first, older wins ties
        candidates.sort_by_key(|(size, sequence_id, _)| (Reverse(*size), *sequence_id));

        let mut candidates = candidates.into_iter().map(|(_, _, id)| id);
        let Some(first) = candidates.next() else {
            return Vec::new();
        };
        let mut biggest_islands = vec![first];

        for island_id in candidates {
            let mut merged = false;

            // Only islands already kept this pass are eligible, never a
            // smaller or not yet processed one
            if let Some(preferred) = self.preferred_island_for(&island_id) {
                if biggest_islands.contains(&preferred)
                    && self.intersect_islands(&preferred, &island_id, join_distance)
                {
                    merged = self.merge_into_if_possible(&preferred, &island_id, updates);
                }
            }

            for index in 0..biggest_islands.len() {
                if merged {
                    break;
                }
                let target = biggest_islands[index].clone();
                if self.intersect_islands(&target, &island_id, join_distance) {
                    merged = self.merge_into_if_possible(&target, &island_id, updates);
                }
            }

            if !merged {
                biggest_islands.push(island_id);
            }
        }

        biggest_islands
    }

    fn merge_into_if_possible(&mut self, target_id: &str, source_id: &str, updates: &mut IslandUpdates) -> bool {
        if target_id == source_id {
            return false;
        }

        let incoming = match self.islands.get(source_id) {
            Some(source) => source.peer_ids.len(),
            None => return false,
        };
        let fits = self
            .islands
            .get(target_id)
            .map_or(false, |target| target.peer_ids.len() + incoming <= target.max_peers);
        if !fits {
            return false;
        }

        let Some(source) = self.islands.remove(source_id) else {
            return false;
        };
        if let Some(target) = self.islands.get_mut(target_id) {
            target.peer_ids.extend(source.peer_ids.iter().cloned());
            target.mark_geometry_dirty();
        }
        self.set_peers_island(target_id, &source.peer_ids, updates);

        true
    }

    /// Most voted preferred island among the members; ties go to the one
    /// voted for first.
    fn preferred_island_for(&self, island_id: &str) -> Option<String> {
        let island = self.islands.get(island_id)?;

        let mut votes: Vec<(&str, usize)> = Vec::new();
        for peer in island.peer_ids.iter().filter_map(|id| self.peers.get(id)) {
            let Some(preferred) = peer.preferred_island_id.as_deref() else {
                continue;
            };
            match votes.iter_mut().find(|(candidate, _)| *candidate == preferred) {
                Some((_, count)) => *count += 1,
                None => votes.push((preferred, 1)),
            }
        }

        let mut winner: Option<(&str, usize)> = None;
        for (candidate, count) in votes {
            if winner.map_or(true, |(_, best)| count > best) {
                winner = Some((candidate, count));
            }
        }

        winner.map(|(candidate, _)| candidate.to_string())
    }

    fn create_island(
        &mut self,
        peer_ids: Vec<String>,
        updates: &mut IslandUpdates,
        affected: &mut AffectedIslands,
    ) -> String {
        let island_id = self.island_ids.generate_id();
        let (transport_id, max_peers) = self.select_transport();
        self.current_sequence += 1;

        self.islands.insert(
            island_id.clone(),
            IslandState {
                id: island_id.clone(),
                peer_ids: peer_ids.clone(),
                max_peers,
                sequence_id: self.current_sequence,
                transport_id,
                geometry: None,
                geometry_dirty: true,
            },
        );
        affected.insert(&island_id);

        self.set_peers_island(&island_id, &peer_ids, updates);
        island_id
    }

    /// Picks the transport for a new island and its capacity.
    ///
    /// A transport qualifies when its seats minus the free slots already
    /// pledged to its islands can host a full island; the one with the most
    /// uncommitted seats wins. Otherwise the island goes peer-to-peer.
    fn select_transport(&self) -> (u32, usize) {
        let mut reserved: HashMap<u32, i64> = HashMap::new();
        for island in self.islands.values() {
            if island.transport_id == P2P_TRANSPORT_ID {
                continue;
            }
            *reserved.entry(island.transport_id).or_insert(0) += island.free_seats() as i64;
        }

        let mut best: Option<(&Transport, i64)> = None;
        for transport in &self.transports {
            if transport.id == P2P_TRANSPORT_ID || transport.max_island_size == 0 {
                continue;
            }

            let uncommitted = transport.available_seats - reserved.get(&transport.id).copied().unwrap_or(0);
            if uncommitted >= transport.max_island_size as i64
                && best.map_or(true, |(_, seats)| uncommitted > seats)
            {
                best = Some((transport, uncommitted));
            }
        }

        match best {
            Some((transport, _)) => (transport.id, transport.max_island_size),
            None => (P2P_TRANSPORT_ID, self.p2p_capacity()),
        }
    }

    fn p2p_capacity(&self) -> usize {
        self.transports
            .iter()
            .find(|transport| transport.id == P2P_TRANSPORT_ID)
            .map_or(self.options.max_peers_per_island, |transport| transport.max_island_size)
    }

    fn set_peers_island(&mut self, island_id: &str, peer_ids: &[String], updates: &mut IslandUpdates) {
        let Some(transport_id) = self.islands.get(island_id).map(|island| island.transport_id) else {
            return;
        };

        for peer_id in peer_ids {
            let Some(peer) = self.peers.get_mut(peer_id) else {
                continue;
            };
            let from_island_id = peer.island_id.replace(island_id.to_string());

            updates.insert(
                peer_id.clone(),
                IslandUpdate::ChangeTo {
                    island_id: island_id.to_string(),
                    from_island_id,
                    transport_id,
                    conn_str: self.connections.connection_string(transport_id, peer_id, island_id),
                },
            );
        }
    }

    /// Removes a peer from an island, deleting the island once empty.
    ///
    /// Returns true if the island still exists.
    fn clear_peer_from_island(&mut self, peer_id: &str, island_id: &str) -> bool {
        let Some(island) = self.islands.get_mut(island_id) else {
            return false;
        };

        island.peer_ids.retain(|id| id != peer_id);
        if island.peer_ids.is_empty() {
            self.islands.remove(island_id);
            false
        } else {
            island.mark_geometry_dirty();
            true
        }
    }
}

impl std::fmt::Debug for Archipelago {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archipelago")
            .field("options", &self.options)
            .field("peers", &self.peers.len())
            .field("islands", &self.islands.len())
            .field("transports", &self.transports.len())
            .field("current_sequence", &self.current_sequence)
            .finish()
    }
}
