//! Player Position
//!
//! World coordinates as reported by the upstream simulation feed.
//! Only the planar (x, y) components take part in proximity checks.

use serde::{Serialize, Deserialize};

/// A point in world space plus facing.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Height. Ignored for proximity.
    pub z: f64,
    /// Orientation in radians. Passed through untouched.
    pub o: f64,
}

impl Position {
    /// Create a position with zero height and orientation.
    #[inline]
    pub const fn planar(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0, o: 0.0 }
    }

    /// Squared distance on the (x, y) plane.
    #[inline]
    pub fn planar_distance_sq(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Whether `other` lies within `range` on the (x, y) plane (inclusive).
    #[inline]
    pub fn is_within(&self, other: &Position, range: f64) -> bool {
        self.planar_distance_sq(other) <= range * range
    }

    /// Orientation converted to degrees, for logging.
    pub fn orientation_degrees(&self) -> f64 {
        self.o.to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_distance_ignores_height() {
        let a = Position { x: 0.0, y: 0.0, z: 0.0, o: 0.0 };
        let b = Position { x: 3.0, y: 4.0, z: 1000.0, o: 1.5 };
        assert_eq!(a.planar_distance_sq(&b), 25.0);
    }

    #[test]
    fn test_within_is_inclusive() {
        let a = Position::planar(0.0, 0.0);
        assert!(a.is_within(&Position::planar(30.0, 40.0), 50.0));
        assert!(!a.is_within(&Position::planar(51.0, 0.0), 50.0));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Position::planar(-12.5, 7.0);
        let b = Position::planar(3.25, -9.0);
        assert_eq!(a.planar_distance_sq(&b), b.planar_distance_sq(&a));
    }

    #[test]
    fn test_orientation_degrees() {
        let p = Position { o: std::f64::consts::PI, ..Default::default() };
        assert!((p.orientation_degrees() - 180.0).abs() < 1e-9);
    }
}
