//! Planar island geometry.
//!
//! Islands live on the horizontal plane: only the X and Z axes take part in
//! distance checks, height (Y) is ignored so peers stacked on different
//! floors of the same building still cluster together.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// A peer position `[x, y, z]` in world units.
pub type Position3D = [f64; 3];

const X_AXIS: usize = 0;
const Z_AXIS: usize = 2;

/// Cached derived shape of an island.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IslandGeometry {
    /// Mean member position on X/Z, Y reported as 0
    pub center: Position3D,

    /// Distance from the center to the farthest member
    pub radius: f64,
}

fn planar(position: &Position3D) -> Vector2<f64> {
    Vector2::new(position[X_AXIS], position[Z_AXIS])
}

/// Squared distance on the X/Z plane.
pub fn squared_distance(a: &Position3D, b: &Position3D) -> f64 {
    (planar(b) - planar(a)).norm_squared()
}

/// True when two positions are within `distance` of each other on the plane.
pub fn within_distance(a: &Position3D, b: &Position3D, distance: f64) -> bool {
    squared_distance(a, b) <= distance * distance
}

/// Computes center and radius for a group of member positions.
///
/// An empty group yields the zero geometry.
pub fn island_geometry<'a, I>(positions: I) -> IslandGeometry
where
    I: IntoIterator<Item = &'a Position3D>,
{
    let points: Vec<Vector2<f64>> = positions.into_iter().map(planar).collect();
    if points.is_empty() {
        return IslandGeometry::default();
    }

    let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p);
    let mean = sum / points.len() as f64;

    let farthest_squared = points
        .iter()
        .map(|p| (p - mean).norm_squared())
        .fold(0.0_f64, f64::max);

    IslandGeometry {
        center: [mean.x, 0.0, mean.y],
        radius: farthest_squared.sqrt(),
    }
}

/// True when two island footprints, each grown by `distance`, overlap.
///
/// This is only the cheap pre-check; two large sparse islands can overlap
/// here without any pair of members actually being close.
pub fn geometries_overlap(a: &IslandGeometry, b: &IslandGeometry, distance: f64) -> bool {
    let reach = a.radius + b.radius + distance;
    squared_distance(&a.center, &b.center) <= reach * reach
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_height_is_ignored() {
        let ground = [0.0, 0.0, 0.0];
        let roof = [3.0, 500.0, 4.0];
        assert_relative_eq!(squared_distance(&ground, &roof), 25.0);
    }

    #[test]
    fn test_within_distance_is_inclusive() {
        assert!(within_distance(&[0.0, 0.0, 0.0], &[64.0, 0.0, 0.0], 64.0));
        assert!(!within_distance(&[0.0, 0.0, 0.0], &[64.1, 0.0, 0.0], 64.0));
    }

    #[test]
    fn test_two_peer_geometry() {
        let geometry = island_geometry(&[[0.0, 0.0, 0.0], [40.0, 0.0, 40.0]]);

        assert_eq!(geometry.center, [20.0, 0.0, 20.0]);
        assert_relative_eq!(geometry.radius, 800.0_f64.sqrt(), epsilon = 1e-7);
    }

    #[test]
    fn test_radius_encompasses_all_peers() {
        let geometry = island_geometry(&[
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 10.0],
            [6.0, 0.0, 6.0],
            [40.0, 0.0, 40.0],
        ]);

        assert_relative_eq!(geometry.center[0], 14.0);
        assert_relative_eq!(geometry.center[2], 14.0);
        assert_relative_eq!(geometry.radius, 1352.0_f64.sqrt(), epsilon = 1e-7);
    }

    #[test]
    fn test_center_drops_height() {
        let geometry = island_geometry(&[[2.0, 10.0, 2.0], [4.0, 30.0, 4.0]]);
        assert_eq!(geometry.center, [3.0, 0.0, 3.0]);
    }

    #[test]
    fn test_empty_group() {
        let geometry = island_geometry(std::iter::empty::<&Position3D>());
        assert_eq!(geometry, IslandGeometry::default());
    }

    #[test]
    fn test_overlap_uses_radii_and_distance() {
        let a = IslandGeometry { center: [0.0, 0.0, 0.0], radius: 10.0 };
        let b = IslandGeometry { center: [100.0, 0.0, 0.0], radius: 20.0 };

        assert!(geometries_overlap(&a, &b, 70.0));
        assert!(!geometries_overlap(&a, &b, 69.0));
    }
}
