//! Target geometry: elevation, lateral bearing offset and distance from a
//! device pose to a world-frame target.
//!
//! # Example
//!
//! ```rust
//! use beacon_perception::algebra::{FrameId, Pose, Vec3};
//! use beacon_perception::geometry::TargetGeometry;
//!
//! let device = Pose::identity(FrameId::World);
//! let g = TargetGeometry::compute(&device, Vec3::new(0.0, 5.0, 0.0)).unwrap();
//! assert!((g.distance - 5.0).abs() < 1e-9);
//! assert!(g.elevation.abs() < 1e-9);
//! ```

use std::f64::consts::{FRAC_PI_2, PI};

use beacon_types::GuidanceError;
use serde::{Deserialize, Serialize};

use crate::algebra::{Pose, Quaternion, Vec3};

/// Body axis compared against the target direction for elevation.
const ELEVATION_AXIS: Vec3 = Vec3::new(0.0, 0.0, 1.0);
/// Body axis compared against the target direction for the lateral offset.
const LATERAL_AXIS: Vec3 = Vec3::new(1.0, 0.0, 0.0);
/// Body axis the device points at a target with.
const HEADING_AXIS: Vec3 = Vec3::new(0.0, 1.0, 0.0);
const HALF_TURN_AXIS: Vec3 = Vec3::new(0.0, 1.0, 0.0);

const ALIGNED_EPSILON: f64 = 1e-12;

/// Geometry of one device → target relation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetGeometry {
    /// Signed vertical offset in radians; positive above, `-π/2` straight below.
    pub elevation: f64,
    /// Lateral offset of the target projected on the device's side axis.
    pub bearing_offset: f64,
    /// Straight-line distance to the target.
    pub distance: f64,
}

impl TargetGeometry {
    /// Compute the geometry for a world-frame `device` pose and `target`.
    ///
    /// # Errors
    ///
    /// [`GuidanceError::DegenerateGeometry`] when the device sits on the
    /// target or its orientation is the zero quaternion.
    pub fn compute(device: &Pose, target: Vec3) -> Result<Self, GuidanceError> {
        let offset = navigation_offset(device.position, target);
        let distance = offset.length();
        let to_target = offset.normalize()?;
        let orientation = device.orientation.normalize()?;

        let forward = axis_in_world(orientation, ELEVATION_AXIS)?;
        let elevation = FRAC_PI_2 - angle_between(forward, to_target);

        let lateral = axis_in_world(orientation, LATERAL_AXIS)?;
        let bearing_offset = distance * angle_between(lateral, to_target).cos();

        Ok(Self {
            elevation,
            bearing_offset,
            distance,
        })
    }
}

/// Offset from `device_position` to `target` in the navigation axes.
///
/// Both points are world-frame. The difference is taken first and then
/// remapped, so the result only depends on the relative position. The
/// vertical axis is negated: the corrected sensor forward runs along
/// navigation `-z`.
pub fn navigation_offset(device_position: Vec3, target: Vec3) -> Vec3 {
    let d = target.sub(device_position);
    Vec3::new(d.x, d.y, -d.z)
}

/// Rotation that turns the device heading onto the direction of `target`.
///
/// Returns the identity when the two are already aligned.
///
/// # Errors
///
/// [`GuidanceError::DegenerateGeometry`] when the target is straight behind
/// the heading (no unique rotation axis) or coincides with the device.
pub fn rotation_to_target(device: &Pose, target: Vec3) -> Result<Quaternion, GuidanceError> {
    let to_target = navigation_offset(device.position, target).normalize()?;
    let heading = axis_in_world(device.orientation.normalize()?, HEADING_AXIS)?;

    if heading.dot(to_target) >= 1.0 - ALIGNED_EPSILON {
        return Ok(Quaternion::identity());
    }
    let axis = heading.cross(to_target).normalize()?;
    Quaternion::from_axis_angle(axis, angle_between(heading, to_target)).normalize()
}

/// Rotate a body axis into the world and apply the half-turn between the
/// sensor's forward and the guidance forward.
fn axis_in_world(orientation: Quaternion, body_axis: Vec3) -> Result<Vec3, GuidanceError> {
    let correction = Quaternion::from_axis_angle(HALF_TURN_AXIS, PI);
    let rotated = orientation.rotate(body_axis).normalize()?;
    correction.rotate(rotated).normalize()
}

/// Angle between two unit vectors; the dot product is clamped so rounding
/// past ±1 cannot produce NaN.
fn angle_between(a: Vec3, b: Vec3) -> f64 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::FrameId;

    fn device_at(position: Vec3, orientation: Quaternion) -> Pose {
        Pose::new(position, orientation, FrameId::World)
    }

    #[test]
    fn target_straight_ahead_is_level() {
        let g = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(0.0, 5.0, 0.0)).unwrap();
        assert!((g.distance - 5.0).abs() < 1e-9);
        assert!(g.elevation.abs() < 1e-9);
        assert!(g.bearing_offset.abs() < 1e-9);
    }

    #[test]
    fn target_below_reaches_negative_quarter_turn() {
        let g = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(0.0, 0.0, -2.0)).unwrap();
        assert!((g.distance - 2.0).abs() < 1e-9);
        assert!((g.elevation + FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn target_above_reaches_positive_quarter_turn() {
        let g = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(0.0, 0.0, 3.0)).unwrap();
        assert!((g.elevation - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn lateral_target_projects_distance_onto_side_axis() {
        // Corrected side axis is (-1, 0, 0): a target on -x lies fully on it.
        let g = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(-4.0, 0.0, 0.0)).unwrap();
        assert!((g.distance - 4.0).abs() < 1e-9);
        assert!((g.bearing_offset - 4.0).abs() < 1e-9);

        let g = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(4.0, 0.0, 0.0)).unwrap();
        assert!((g.bearing_offset + 4.0).abs() < 1e-9);
    }

    #[test]
    fn distance_is_euclidean_between_world_points() {
        let device = device_at(Vec3::new(1.0, 0.5, 2.0), Quaternion::identity());
        let target = Vec3::new(4.0, 4.5, 2.0);
        let g = TargetGeometry::compute(&device, target).unwrap();
        assert!((g.distance - 5.0).abs() < 1e-12);
    }

    #[test]
    fn geometry_is_invariant_under_translation() {
        let at_origin = TargetGeometry::compute(&Pose::identity(FrameId::World), Vec3::new(0.0, 5.0, 0.0)).unwrap();

        let device = device_at(Vec3::new(0.0, 0.0, 1.5), Quaternion::identity());
        let g = TargetGeometry::compute(&device, Vec3::new(0.0, 5.0, 1.5)).unwrap();
        assert!((g.distance - 5.0).abs() < 1e-12);
        assert!(g.elevation.abs() < 1e-9);

        let shift = Vec3::new(-3.0, 7.0, 2.5);
        let device = device_at(shift, Quaternion::identity());
        let g = TargetGeometry::compute(&device, Vec3::new(0.0, 5.0, 0.0).add(shift)).unwrap();
        assert!((g.distance - at_origin.distance).abs() < 1e-12);
        assert!((g.elevation - at_origin.elevation).abs() < 1e-12);
        assert!((g.bearing_offset - at_origin.bearing_offset).abs() < 1e-12);
    }

    #[test]
    fn target_below_an_elevated_device() {
        let device = device_at(Vec3::new(2.0, -1.0, 3.0), Quaternion::identity());
        let g = TargetGeometry::compute(&device, Vec3::new(2.0, -1.0, 1.0)).unwrap();
        assert!((g.distance - 2.0).abs() < 1e-12);
        assert!((g.elevation + FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn device_on_target_is_degenerate() {
        let device = device_at(Vec3::new(1.0, 2.0, 3.0), Quaternion::identity());
        let err = TargetGeometry::compute(&device, Vec3::new(1.0, 2.0, 3.0)).unwrap_err();
        assert!(matches!(err, GuidanceError::DegenerateGeometry(_)));
    }

    #[test]
    fn angle_between_clamps_rounding_past_unit_dot() {
        let scale = 1.0 + 1e-15;
        let a = Vec3::new(0.6, 0.8, 0.0).scale(scale);
        assert!(a.dot(a) > 1.0);
        let same = angle_between(a, a);
        assert!(same.is_finite());
        assert!(same.abs() < 1e-12);

        let b = a.scale(-1.0);
        assert!(a.dot(b) < -1.0);
        let opposite = angle_between(a, b);
        assert!(opposite.is_finite());
        assert!((opposite - PI).abs() < 1e-12);
    }

    #[test]
    fn unnormalized_orientation_is_accepted() {
        let scaled = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        let g = TargetGeometry::compute(&device_at(Vec3::zero(), scaled), Vec3::new(0.0, 5.0, 0.0)).unwrap();
        assert!(g.elevation.abs() < 1e-9);
        assert!(g.elevation.is_finite() && g.bearing_offset.is_finite());
    }

    #[test]
    fn zero_orientation_is_degenerate() {
        let zero = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert!(TargetGeometry::compute(&device_at(Vec3::zero(), zero), Vec3::new(0.0, 5.0, 0.0)).is_err());
    }

    #[test]
    fn rotation_to_target_turns_heading_onto_target() {
        let device = Pose::identity(FrameId::World);
        let target = Vec3::new(3.0, 0.0, -3.0);
        let q = rotation_to_target(&device, target).unwrap();

        let heading = axis_in_world(Quaternion::identity(), HEADING_AXIS).unwrap();
        let to_target = navigation_offset(device.position, target).normalize().unwrap();
        assert!(q.rotate(heading).distance_to(to_target) < 1e-9);
    }

    #[test]
    fn rotation_to_aligned_target_is_identity() {
        // Corrected heading for the identity pose is +y.
        let q = rotation_to_target(&Pose::identity(FrameId::World), Vec3::new(0.0, 7.0, 0.0)).unwrap();
        assert_eq!(q, Quaternion::identity());
    }

    #[test]
    fn rotation_to_target_behind_is_degenerate() {
        let err = rotation_to_target(&Pose::identity(FrameId::World), Vec3::new(0.0, -7.0, 0.0)).unwrap_err();
        assert!(matches!(err, GuidanceError::DegenerateGeometry(_)));
    }
}
