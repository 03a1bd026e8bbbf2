//! Ground truth crowd for simulation.
//!
//! The Crowd holds the true positions of every simulated peer:
//! - Walkers gathered around hotspots (Gaussian spread)
//! - Constant-velocity motion with seeded jitter
//! - Connection state (offline walkers stop sending heartbeats)

use archipelago_core::PeerPositionChange;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A simulated peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Walker {
    pub id: String,

    /// Position [x, y, z] in world units
    pub position: Vector3<f64>,

    /// Velocity on the ground plane (y stays 0)
    pub velocity: Vector3<f64>,

    /// Island this walker would like to join
    pub preferred_island: Option<String>,

    /// Offline walkers keep their last position but stop reporting
    pub online: bool,
}

/// The Crowd - maintains ground truth and produces position reports.
pub struct Crowd {
    rng: ChaCha8Rng,

    /// BTreeMap so reports come out in a stable order
    walkers: BTreeMap<String, Walker>,

    next_id: u64,

    current_time: f64,

    /// Per-second standard deviation of velocity jitter
    jitter_std: f64,
}

impl Crowd {
    /// Creates an empty crowd with its own seed.
    ///
    /// The crowd seed is derived separately from the run seed so changing
    /// the flush cadence never changes trajectories.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            walkers: BTreeMap::new(),
            next_id: 0,
            current_time: 0.0,
            jitter_std: 0.5,
        }
    }

    pub fn set_jitter(&mut self, std_dev: f64) {
        self.jitter_std = std_dev.max(0.0);
    }

    fn gaussian(&mut self, std_dev: f64) -> f64 {
        let sample: f64 = self.rng.sample(StandardNormal);
        sample * std_dev
    }

    /// Spawns `count` walkers around `center` and returns their ids.
    pub fn spawn_group(&mut self, center: Vector3<f64>, spread: f64, velocity: Vector3<f64>, count: usize) -> Vec<String> {
        (0..count)
            .map(|_| {
                let offset = Vector3::new(self.gaussian(spread), 0.0, self.gaussian(spread));
                self.spawn(center + offset, velocity)
            })
            .collect()
    }

    pub fn spawn(&mut self, position: Vector3<f64>, velocity: Vector3<f64>) -> String {
        let id = format!("peer-{}", self.next_id);
        self.next_id += 1;

        self.walkers.insert(
            id.clone(),
            Walker {
                id: id.clone(),
                position,
                velocity,
                preferred_island: None,
                online: true,
            },
        );
        id
    }

    /// Advances motion by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        let jitter = self.jitter_std * dt.sqrt();

        let ids: Vec<String> = self.walkers.keys().cloned().collect();
        for id in ids {
            let nudge = Vector3::new(self.gaussian(jitter), 0.0, self.gaussian(jitter));
            if let Some(walker) = self.walkers.get_mut(&id) {
                if walker.online {
                    walker.velocity += nudge;
                    walker.position += walker.velocity * dt;
                }
            }
        }
    }

    /// Points every walker in `ids` towards `target` at `speed` units/s.
    pub fn head_to(&mut self, ids: &[String], target: Vector3<f64>, speed: f64) {
        for id in ids {
            if let Some(walker) = self.walkers.get_mut(id) {
                let direction = target - walker.position;
                walker.velocity = if direction.norm() > f64::EPSILON {
                    direction.normalize() * speed
                } else {
                    Vector3::zeros()
                };
            }
        }
    }

    /// Sends every walker in `ids` straight away from `origin`.
    pub fn head_away(&mut self, ids: &[String], origin: Vector3<f64>, speed: f64) {
        for id in ids {
            let Some(position) = self.walkers.get(id).map(|walker| walker.position) else {
                continue;
            };
            let direction = Vector3::new(position.x - origin.x, 0.0, position.z - origin.z);
            let target = if direction.norm() > f64::EPSILON {
                position + direction
            } else {
                // Dead center: pick any heading
                let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
                position + Vector3::new(angle.cos(), 0.0, angle.sin())
            };
            self.head_to(std::slice::from_ref(id), target, speed);
        }
    }

    /// Gives every walker in `ids` a random heading at `speed`.
    pub fn wander(&mut self, ids: &[String], speed: f64) {
        for id in ids {
            let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
            if let Some(walker) = self.walkers.get_mut(id) {
                walker.velocity = Vector3::new(angle.cos(), 0.0, angle.sin()) * speed;
            }
        }
    }

    /// Stops every walker in place.
    pub fn halt(&mut self) {
        for walker in self.walkers.values_mut() {
            walker.velocity = Vector3::zeros();
        }
    }

    pub fn set_preferred_island(&mut self, ids: &[String], island_id: Option<String>) {
        for id in ids {
            if let Some(walker) = self.walkers.get_mut(id) {
                walker.preferred_island = island_id.clone();
            }
        }
    }

    /// Takes a random `fraction` of the online walkers offline and returns them.
    pub fn disconnect_fraction(&mut self, fraction: f64) -> Vec<String> {
        let online: Vec<String> = self
            .walkers
            .values()
            .filter(|walker| walker.online)
            .map(|walker| walker.id.clone())
            .collect();

        let mut dropped = Vec::new();
        for id in online {
            if self.rng.gen_bool(fraction.clamp(0.0, 1.0)) {
                if let Some(walker) = self.walkers.get_mut(&id) {
                    walker.online = false;
                    dropped.push(id);
                }
            }
        }
        dropped
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn walker(&self, id: &str) -> Option<&Walker> {
        self.walkers.get(id)
    }

    pub fn online_count(&self) -> usize {
        self.walkers.values().filter(|walker| walker.online).count()
    }

    pub fn online_walkers(&self) -> impl Iterator<Item = &Walker> {
        self.walkers.values().filter(|walker| walker.online)
    }

    /// Brings offline walkers back; they report again from their last position.
    pub fn reconnect(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(walker) = self.walkers.get_mut(id) {
                walker.online = true;
            }
        }
    }

    /// Position reports for every online walker.
    pub fn position_reports(&self) -> Vec<PeerPositionChange> {
        self.walkers
            .values()
            .filter(|walker| walker.online)
            .map(|walker| {
                let change = PeerPositionChange::new(
                    walker.id.clone(),
                    [walker.position.x, walker.position.y, walker.position.z],
                );
                match &walker.preferred_island {
                    Some(island_id) => change.with_preferred_island(island_id.clone()),
                    None => change,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crowd_spawn_group() {
        let mut crowd = Crowd::new(42);
        let ids = crowd.spawn_group(Vector3::new(100.0, 0.0, 100.0), 5.0, Vector3::zeros(), 10);

        assert_eq!(ids.len(), 10);
        assert_eq!(crowd.online_count(), 10);
        for id in &ids {
            let walker = crowd.walker(id).unwrap();
            assert_eq!(walker.position.y, 0.0);
            assert!((walker.position - Vector3::new(100.0, 0.0, 100.0)).norm() < 50.0);
        }
    }

    #[test]
    fn test_crowd_motion_step() {
        let mut crowd = Crowd::new(42);
        crowd.set_jitter(0.0);
        let id = crowd.spawn(Vector3::zeros(), Vector3::new(20.0, 0.0, 0.0));

        crowd.step(1.0);

        let walker = crowd.walker(&id).unwrap();
        assert!((walker.position.x - 20.0).abs() < 0.001);
        assert!((crowd.time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_crowd_is_deterministic() {
        let mut a = Crowd::new(7);
        let mut b = Crowd::new(7);
        a.spawn_group(Vector3::zeros(), 10.0, Vector3::zeros(), 5);
        b.spawn_group(Vector3::zeros(), 10.0, Vector3::zeros(), 5);
        a.step(0.1);
        b.step(0.1);

        assert_eq!(a.position_reports(), b.position_reports());
    }

    #[test]
    fn test_offline_walkers_stop_reporting() {
        let mut crowd = Crowd::new(1);
        crowd.spawn_group(Vector3::zeros(), 1.0, Vector3::zeros(), 20);

        let dropped = crowd.disconnect_fraction(1.0);

        assert_eq!(dropped.len(), 20);
        assert!(crowd.position_reports().is_empty());
    }

    #[test]
    fn test_reports_carry_preferred_island() {
        let mut crowd = Crowd::new(3);
        let ids = crowd.spawn_group(Vector3::zeros(), 1.0, Vector3::zeros(), 2);
        crowd.set_preferred_island(&ids[..1], Some("I4".to_string()));

        let reports = crowd.position_reports();
        assert_eq!(reports[0].preferred_island_id, Some(Some("I4".to_string())));
        assert_eq!(reports[1].preferred_island_id, None);
    }

    #[test]
    fn test_head_away_moves_outward() {
        let mut crowd = Crowd::new(5);
        crowd.set_jitter(0.0);
        let ids = vec![
            crowd.spawn(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros()),
            crowd.spawn(Vector3::new(0.0, 0.0, -10.0), Vector3::zeros()),
        ];

        crowd.head_away(&ids, Vector3::zeros(), 5.0);
        crowd.step(2.0);

        assert!((crowd.walker(&ids[0]).unwrap().position.x - 20.0).abs() < 1e-9);
        assert!((crowd.walker(&ids[1]).unwrap().position.z + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_reconnect_resumes_reports() {
        let mut crowd = Crowd::new(9);
        crowd.spawn_group(Vector3::zeros(), 1.0, Vector3::zeros(), 4);
        let dropped = crowd.disconnect_fraction(1.0);

        crowd.reconnect(&dropped[..2]);

        assert_eq!(crowd.online_count(), 2);
        assert_eq!(crowd.online_walkers().count(), 2);
    }
}
