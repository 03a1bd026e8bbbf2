//! Invariant checks over a converged island partition.
//!
//! Only public snapshots are inspected, so the same checks apply to the
//! engine used directly and to islands fetched through the controller.

use archipelago_core::island_geometry::within_distance;
use archipelago_core::{ArchipelagoOptions, Island};
use std::collections::HashMap;
use thiserror::Error;

/// A broken partition property.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("peer {peer} is listed in islands {first} and {second}")]
    DuplicateMembership { peer: String, first: String, second: String },

    #[error("peer {peer} in island {island} claims island {claimed:?}")]
    StaleMembership { peer: String, island: String, claimed: Option<String> },

    #[error("island {island} holds {peers} peers but allows {max_peers}")]
    OverCapacity { island: String, peers: usize, max_peers: usize },

    #[error("island {island} is not connected under leave distance")]
    Disconnected { island: String },

    #[error("islands {first} and {second} are within join distance and fit together")]
    MissedMerge { first: String, second: String },

    #[error("expected {expected} peers in islands, found {found}")]
    PeerCount { expected: usize, found: usize },
}

/// Runs every check and returns the violations found.
///
/// Islands with zero capacity are retired (their transport vanished) and
/// are exempt from the capacity check.
pub fn check_partition(islands: &[Island], options: &ArchipelagoOptions) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    check_membership(islands, &mut violations);

    for island in islands {
        if island.max_peers > 0 && island.peers.len() > island.max_peers {
            violations.push(InvariantViolation::OverCapacity {
                island: island.id.clone(),
                peers: island.peers.len(),
                max_peers: island.max_peers,
            });
        }

        if !is_connected(island, options.leave_distance) {
            violations.push(InvariantViolation::Disconnected {
                island: island.id.clone(),
            });
        }
    }

    check_join_closure(islands, options.join_distance, &mut violations);
    violations
}

/// Same as [`check_partition`] plus the total peer count.
pub fn check_population(
    islands: &[Island],
    options: &ArchipelagoOptions,
    expected_peers: usize,
) -> Vec<InvariantViolation> {
    let mut violations = check_partition(islands, options);

    let found: usize = islands.iter().map(|island| island.peers.len()).sum();
    if found != expected_peers {
        violations.push(InvariantViolation::PeerCount {
            expected: expected_peers,
            found,
        });
    }
    violations
}

fn check_membership(islands: &[Island], violations: &mut Vec<InvariantViolation>) {
    let mut seen: HashMap<&str, &str> = HashMap::new();

    for island in islands {
        for peer in &island.peers {
            if let Some(first) = seen.insert(&peer.id, &island.id) {
                violations.push(InvariantViolation::DuplicateMembership {
                    peer: peer.id.clone(),
                    first: first.to_string(),
                    second: island.id.clone(),
                });
            }

            if peer.island_id.as_deref() != Some(island.id.as_str()) {
                violations.push(InvariantViolation::StaleMembership {
                    peer: peer.id.clone(),
                    island: island.id.clone(),
                    claimed: peer.island_id.clone(),
                });
            }
        }
    }
}

fn is_connected(island: &Island, distance: f64) -> bool {
    let peers = &island.peers;
    if peers.len() <= 1 {
        return true;
    }

    let mut reached = vec![false; peers.len()];
    reached[0] = true;
    let mut frontier = vec![0];

    while let Some(current) = frontier.pop() {
        for (index, candidate) in peers.iter().enumerate() {
            if !reached[index] && within_distance(&peers[current].position, &candidate.position, distance) {
                reached[index] = true;
                frontier.push(index);
            }
        }
    }

    reached.into_iter().all(|r| r)
}

/// Two islands with a member pair within join distance must not both have
/// room for the other.
fn check_join_closure(islands: &[Island], distance: f64, violations: &mut Vec<InvariantViolation>) {
    for (i, first) in islands.iter().enumerate() {
        for second in &islands[i + 1..] {
            let combined = first.peers.len() + second.peers.len();
            if combined > first.max_peers.min(second.max_peers) {
                continue;
            }

            let close = first.peers.iter().any(|a| {
                second
                    .peers
                    .iter()
                    .any(|b| within_distance(&a.position, &b.position, distance))
            });
            if close {
                violations.push(InvariantViolation::MissedMerge {
                    first: first.id.clone(),
                    second: second.id.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archipelago_core::{Archipelago, PeerPositionChange, UpdatableOptions};
    use proptest::prelude::*;

    fn converge(options: &ArchipelagoOptions, positions: &[(f64, f64)]) -> Archipelago {
        let mut archipelago = Archipelago::new(options.clone());
        let changes: Vec<PeerPositionChange> = positions
            .iter()
            .enumerate()
            .map(|(i, (x, z))| PeerPositionChange::new(format!("p{}", i), [*x, 0.0, *z]))
            .collect();
        archipelago.apply_position_changes(&changes);
        archipelago
    }

    fn membership(archipelago: &mut Archipelago) -> Vec<(String, u64, Vec<String>)> {
        archipelago
            .get_islands()
            .into_iter()
            .map(|island| {
                let mut ids: Vec<String> = island.peers.iter().map(|peer| peer.id.clone()).collect();
                ids.sort();
                (island.id, island.sequence_id, ids)
            })
            .collect()
    }

    #[test]
    fn test_three_peer_scenario() {
        let options = ArchipelagoOptions::with_distances(64.0, 80.0);
        let mut archipelago = converge(&options, &[(0.0, 0.0), (16.0, 16.0), (90.0, 90.0)]);

        let islands = archipelago.get_islands();
        assert_eq!(islands.len(), 2);
        assert!(check_population(&islands, &options, 3).is_empty());
    }

    #[test]
    fn test_detects_missed_merge() {
        let options = ArchipelagoOptions::default();
        let mut archipelago = converge(&options, &[(0.0, 0.0)]);
        let mut other = converge(&options, &[(10.0, 0.0)]);

        let mut islands = archipelago.get_islands();
        let mut foreign = other.get_islands();
        foreign[0].id = "X1".to_string();
        foreign[0].peers[0].id = "q".to_string();
        foreign[0].peers[0].island_id = Some("X1".to_string());
        islands.extend(foreign);

        assert_eq!(
            check_partition(&islands, &options),
            vec![InvariantViolation::MissedMerge {
                first: "I1".to_string(),
                second: "X1".to_string()
            }]
        );
    }

    #[test]
    fn test_detects_duplicate_and_count() {
        let options = ArchipelagoOptions::default();
        let mut archipelago = converge(&options, &[(0.0, 0.0)]);
        let island = archipelago.get_islands().remove(0);

        let violations = check_population(&[island.clone(), island], &options, 1);
        assert!(violations
            .iter()
            .any(|v| matches!(v, InvariantViolation::DuplicateMembership { .. })));
        assert!(violations
            .iter()
            .any(|v| matches!(v, InvariantViolation::PeerCount { expected: 1, found: 2 })));
    }

    fn positions() -> impl Strategy<Value = Vec<(f64, f64)>> {
        prop::collection::vec((-300.0..300.0f64, -300.0..300.0f64), 1..40)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_converged_partition_holds(points in positions()) {
            let options = ArchipelagoOptions::default();
            let mut archipelago = converge(&options, &points);

            let islands = archipelago.get_islands();
            let violations = check_population(&islands, &options, points.len());
            prop_assert!(violations.is_empty(), "{:?}", violations);
        }

        #[test]
        fn prop_capacity_is_respected(points in positions(), capacity in 1usize..6) {
            let options = ArchipelagoOptions { max_peers_per_island: capacity, ..ArchipelagoOptions::default() };
            let mut archipelago = converge(&options, &points);

            for island in archipelago.get_islands() {
                prop_assert!(island.peers.len() <= capacity);
            }
        }

        #[test]
        fn prop_reconvergence_is_idempotent(points in positions()) {
            let options = ArchipelagoOptions::default();
            let mut archipelago = converge(&options, &points);
            let before = membership(&mut archipelago);

            let updates = archipelago.modify_options(&UpdatableOptions::default());

            prop_assert!(updates.is_empty());
            prop_assert_eq!(before, membership(&mut archipelago));
        }

        #[test]
        fn prop_movement_keeps_partition(points in positions(), shift in -120.0..120.0f64) {
            let options = ArchipelagoOptions::default();
            let mut archipelago = converge(&options, &points);

            // Move every other peer; the rest stay put
            let moved: Vec<PeerPositionChange> = points
                .iter()
                .enumerate()
                .filter(|(i, _)| i % 2 == 0)
                .map(|(i, (x, z))| PeerPositionChange::new(format!("p{}", i), [x + shift, 0.0, *z]))
                .collect();
            archipelago.apply_position_changes(&moved);

            let islands = archipelago.get_islands();
            let violations = check_population(&islands, &options, points.len());
            prop_assert!(violations.is_empty(), "{:?}", violations);
        }

        #[test]
        fn prop_removal_then_readd_is_fresh(points in positions()) {
            let options = ArchipelagoOptions::default();
            let mut archipelago = converge(&options, &points);
            let (x, z) = points[0];

            archipelago.remove_peers(&["p0"]);
            prop_assert!(archipelago.get_peer_data("p0").is_none());

            let updates = archipelago.apply_position_changes(&[PeerPositionChange::new("p0", [x, 0.0, z])]);
            let data = archipelago.get_peer_data("p0").unwrap();
            prop_assert_eq!(data.island_id.as_deref(), updates.get("p0").map(|u| u.island_id()));

            let islands = archipelago.get_islands();
            prop_assert!(check_population(&islands, &options, points.len()).is_empty());
        }
    }
}
