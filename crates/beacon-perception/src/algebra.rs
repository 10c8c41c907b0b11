//! Frame algebra: vectors, unit quaternions, homogeneous 4×4 transforms and
//! frame-tagged poses.
//!
//! Conventions used throughout the workspace:
//!
//! * Quaternions follow the Hamilton, right-handed convention.  A vector is
//!   rotated with the sandwich product `q · (0, v) · q*`.
//! * [`Matrix4`] is stored row-major and acts on column vectors, so a chain
//!   of frame changes `A_T_B · B_T_C` yields `A_T_C`.
//!
//! # Example
//!
//! ```rust
//! use beacon_perception::algebra::{FrameId, Matrix4, Pose, Quaternion, Vec3};
//!
//! let pose = Pose::new(
//!     Vec3::new(1.0, 2.0, 3.0),
//!     Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), std::f64::consts::FRAC_PI_2),
//!     FrameId::World,
//! );
//! let back = Pose::from_matrix(&pose.to_matrix(), FrameId::World).unwrap();
//! assert!((back.position.x - 1.0).abs() < 1e-9);
//! ```

use beacon_types::GuidanceError;
use serde::{Deserialize, Serialize};

/// Below this magnitude a pivot, column or axis is treated as zero.
const SINGULAR_EPSILON: f64 = 1e-12;

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Right-handed cross product `self × rhs`.
    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// Euclidean norm.
    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance_to(self, other: Self) -> f64 {
        self.sub(other).length()
    }

    /// Scale to unit length.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] when the vector has zero
    /// (or non-finite) length.  There is no safe default direction, so the
    /// caller decides how to recover.
    pub fn normalize(self) -> Result<Self, GuidanceError> {
        let len = self.length();
        if len == 0.0 || !len.is_finite() {
            return Err(GuidanceError::DegenerateGeometry(format!(
                "cannot normalize vector ({}, {}, {})",
                self.x, self.y, self.z
            )));
        }
        Ok(self.scale(1.0 / len))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A quaternion representing a 3-D rotation (w, x, y, z storage).
///
/// The unit-norm invariant is *not* enforced automatically: call
/// [`Quaternion::normalize`] after composing rotations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Quaternion {
    /// Create a quaternion from raw components.
    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build from the sensor wire order `[x, y, z, w]`.
    pub fn from_xyzw(q: [f64; 4]) -> Self {
        Self::new(q[3], q[0], q[1], q[2])
    }

    /// Components in the sensor wire order `[x, y, z, w]`.
    pub fn to_xyzw(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Rotation of `angle` radians about `axis`.  `axis` must be unit length.
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let (s, c) = (angle / 2.0).sin_cos();
        Self::new(c, axis.x * s, axis.y * s, axis.z * s)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Rescale to unit norm.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] for the zero quaternion.
    pub fn normalize(self) -> Result<Self, GuidanceError> {
        let n = self.norm();
        if n == 0.0 || !n.is_finite() {
            return Err(GuidanceError::DegenerateGeometry(
                "cannot normalize zero quaternion".to_string(),
            ));
        }
        Ok(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Hamilton product `self · rhs`: `rhs` is applied first, then `self`.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Multiplicative inverse `q* / ‖q‖²`.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] for the zero quaternion.
    pub fn inverse(self) -> Result<Self, GuidanceError> {
        let n2 = self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z;
        if n2 == 0.0 || !n2.is_finite() {
            return Err(GuidanceError::DegenerateGeometry(
                "cannot invert zero quaternion".to_string(),
            ));
        }
        let c = self.conjugate();
        Ok(Self::new(c.w / n2, c.x / n2, c.y / n2, c.z / n2))
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    ///
    /// `self` must be unit length; this is not checked.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// 4-D dot product; `|a.dot(b)| ≈ 1` when both encode the same rotation.
    pub fn dot(self, rhs: Self) -> f64 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Row-major 3×3 rotation matrix of a unit quaternion.
    pub fn to_rotation_matrix(self) -> [[f64; 3]; 3] {
        let Self { w, x, y, z } = self;
        [
            [
                1.0 - 2.0 * (y * y + z * z),
                2.0 * (x * y - w * z),
                2.0 * (x * z + w * y),
            ],
            [
                2.0 * (x * y + w * z),
                1.0 - 2.0 * (x * x + z * z),
                2.0 * (y * z - w * x),
            ],
            [
                2.0 * (x * z - w * y),
                2.0 * (y * z + w * x),
                1.0 - 2.0 * (x * x + y * y),
            ],
        ]
    }

    /// Unit quaternion from an orthonormal, right-handed rotation matrix.
    pub fn from_rotation_matrix(r: [[f64; 3]; 3]) -> Self {
        let trace = r[0][0] + r[1][1] + r[2][2];
        let q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Self::new(
                0.25 * s,
                (r[2][1] - r[1][2]) / s,
                (r[0][2] - r[2][0]) / s,
                (r[1][0] - r[0][1]) / s,
            )
        } else if r[0][0] > r[1][1] && r[0][0] > r[2][2] {
            let s = (1.0 + r[0][0] - r[1][1] - r[2][2]).sqrt() * 2.0;
            Self::new(
                (r[2][1] - r[1][2]) / s,
                0.25 * s,
                (r[0][1] + r[1][0]) / s,
                (r[0][2] + r[2][0]) / s,
            )
        } else if r[1][1] > r[2][2] {
            let s = (1.0 + r[1][1] - r[0][0] - r[2][2]).sqrt() * 2.0;
            Self::new(
                (r[0][2] - r[2][0]) / s,
                (r[0][1] + r[1][0]) / s,
                0.25 * s,
                (r[1][2] + r[2][1]) / s,
            )
        } else {
            let s = (1.0 + r[2][2] - r[0][0] - r[1][1]).sqrt() * 2.0;
            Self::new(
                (r[1][0] - r[0][1]) / s,
                (r[0][2] + r[2][0]) / s,
                (r[1][2] + r[2][1]) / s,
                0.25 * s,
            )
        };
        // s > 0 in every branch for a proper rotation, so the norm is nonzero.
        q.normalize().unwrap_or(Self::identity())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Matrix4
// ────────────────────────────────────────────────────────────────────────────

/// A homogeneous 4×4 transform, row-major, acting on column vectors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4 {
    pub m: [[f64; 4]; 4],
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix4 {
    pub const fn from_rows(m: [[f64; 4]; 4]) -> Self {
        Self { m }
    }

    pub const fn identity() -> Self {
        Self::from_rows([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Transcribe a column-major array (OpenGL / renderer layout).
    pub fn from_column_major(a: [f64; 16]) -> Self {
        let mut m = [[0.0; 4]; 4];
        for (col, chunk) in a.chunks_exact(4).enumerate() {
            for (row, v) in chunk.iter().enumerate() {
                m[row][col] = *v;
            }
        }
        Self { m }
    }

    /// Column-major copy, suitable for handing to a renderer.
    pub fn to_column_major(&self) -> [f64; 16] {
        let mut a = [0.0; 16];
        for (row, r) in self.m.iter().enumerate() {
            for (col, v) in r.iter().enumerate() {
                a[col * 4 + row] = *v;
            }
        }
        a
    }

    pub fn from_translation(t: Vec3) -> Self {
        let mut out = Self::identity();
        out.m[0][3] = t.x;
        out.m[1][3] = t.y;
        out.m[2][3] = t.z;
        out
    }

    /// Translation · Rotation · Scale.
    pub fn from_trs(translation: Vec3, rotation: Quaternion, scale: Vec3) -> Self {
        let r = rotation.to_rotation_matrix();
        let s = [scale.x, scale.y, scale.z];
        let mut out = Self::identity();
        for row in 0..3 {
            for col in 0..3 {
                out.m[row][col] = r[row][col] * s[col];
            }
        }
        out.m[0][3] = translation.x;
        out.m[1][3] = translation.y;
        out.m[2][3] = translation.z;
        out
    }

    /// Matrix product `self · rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[0.0; 4]; 4];
        for (row, out_row) in out.iter_mut().enumerate() {
            for (col, cell) in out_row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[row][k] * rhs.m[k][col]).sum();
            }
        }
        Self { m: out }
    }

    /// General inverse by Gauss–Jordan elimination with partial pivoting.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] for a singular matrix.
    pub fn inverse(&self) -> Result<Self, GuidanceError> {
        let mut a = self.m;
        let mut inv = Self::identity().m;

        for col in 0..4 {
            let pivot = (col..4).fold(col, |best, row| {
                if a[row][col].abs() > a[best][col].abs() {
                    row
                } else {
                    best
                }
            });
            if a[pivot][col].abs() < SINGULAR_EPSILON {
                return Err(GuidanceError::DegenerateGeometry(
                    "matrix is singular".to_string(),
                ));
            }
            a.swap(pivot, col);
            inv.swap(pivot, col);

            let p = a[col][col];
            for k in 0..4 {
                a[col][k] /= p;
                inv[col][k] /= p;
            }

            let pivot_row = a[col];
            let pivot_inv = inv[col];
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let f = a[row][col];
                if f == 0.0 {
                    continue;
                }
                for k in 0..4 {
                    a[row][k] -= f * pivot_row[k];
                    inv[row][k] -= f * pivot_inv[k];
                }
            }
        }

        Ok(Self { m: inv })
    }

    /// Apply the full affine transform to a point.
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let m = &self.m;
        Vec3::new(
            m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3],
            m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3],
            m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z + m[2][3],
        )
    }

    /// Apply only the linear (rotation/scale) block to a direction.
    pub fn rotate_vector(&self, v: Vec3) -> Vec3 {
        let m = &self.m;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.m[0][3], self.m[1][3], self.m[2][3])
    }

    fn column(&self, col: usize) -> Vec3 {
        Vec3::new(self.m[0][col], self.m[1][col], self.m[2][col])
    }

    /// Per-axis scale, i.e. the norms of the three basis columns.
    pub fn scale(&self) -> Vec3 {
        Vec3::new(
            self.column(0).length(),
            self.column(1).length(),
            self.column(2).length(),
        )
    }

    /// Extract the rotation as a unit quaternion.
    ///
    /// Scale is divided out and the basis is re-orthonormalized
    /// (Gram–Schmidt) first, so drift accumulated over long matrix chains
    /// does not leak into the quaternion.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] when the basis columns
    /// are zero or collinear.
    pub fn rotation(&self) -> Result<Quaternion, GuidanceError> {
        let c0 = self.column(0).normalize()?;
        let c1 = self.column(1);
        let c1 = c1.sub(c0.scale(c0.dot(c1))).normalize()?;
        let c2 = c0.cross(c1);
        let r = [
            [c0.x, c1.x, c2.x],
            [c0.y, c1.y, c2.y],
            [c0.z, c1.z, c2.z],
        ];
        Ok(Quaternion::from_rotation_matrix(r))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pose
// ────────────────────────────────────────────────────────────────────────────

/// Named reference frames a [`Pose`] can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameId {
    /// The stable start-of-service / area-description frame (z up).
    World,
    Device,
    Imu,
    ColorCamera,
    DepthCamera,
    /// The rendering engine's world frame (y up).
    RenderWorld,
    /// The rendering engine's camera frame.
    RenderCamera,
}

/// A rigid-body pose: position plus orientation, tagged with the frame it is
/// expressed in.
///
/// Poses are values: every update produces a new `Pose`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quaternion,
    pub frame: FrameId,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quaternion, frame: FrameId) -> Self {
        Self {
            position,
            orientation,
            frame,
        }
    }

    /// The identity pose in `frame`.
    pub fn identity(frame: FrameId) -> Self {
        Self::new(Vec3::zero(), Quaternion::identity(), frame)
    }

    /// Compose two poses: `self` = A_T_B, `other` = B_T_C gives A_T_C.
    ///
    /// The result stays tagged with `self.frame`.
    pub fn compose(&self, other: &Self) -> Self {
        let translated = self.position.add(self.orientation.rotate(other.position));
        let rotated = self.orientation.mul(other.orientation);
        Self::new(translated, rotated, self.frame)
    }

    /// Homogeneous matrix with unit scale.
    pub fn to_matrix(&self) -> Matrix4 {
        Matrix4::from_trs(
            self.position,
            self.orientation,
            Vec3::new(1.0, 1.0, 1.0),
        )
    }

    /// Recover a pose from a homogeneous matrix, tagging it with `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`GuidanceError::DegenerateGeometry`] if the rotation block is
    /// degenerate.
    pub fn from_matrix(m: &Matrix4, frame: FrameId) -> Result<Self, GuidanceError> {
        Ok(Self::new(m.translation(), m.rotation()?, frame))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

    fn assert_vec_close(a: Vec3, b: Vec3, tol: f64) {
        assert!(
            a.distance_to(b) < tol,
            "expected {b:?}, got {a:?} (tolerance {tol})"
        );
    }

    fn sample_quaternions() -> Vec<Quaternion> {
        vec![
            Quaternion::identity(),
            Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2),
            Quaternion::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), PI),
            Quaternion::new(0.3, -0.5, 0.7, 0.1).normalize().unwrap(),
            Quaternion::new(-0.9, 0.1, 0.2, -0.3).normalize().unwrap(),
        ]
    }

    // ── Vec3 ────────────────────────────────────────────────────────────────

    #[test]
    fn normalize_yields_unit_length() {
        for v in [
            Vec3::new(3.0, 4.0, 0.0),
            Vec3::new(-1e-6, 2e-6, 5e-7),
            Vec3::new(1e6, -3e5, 7.0),
        ] {
            let n = v.normalize().unwrap();
            assert!((n.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn normalize_zero_vector_is_an_error() {
        let err = Vec3::zero().normalize().unwrap_err();
        assert!(matches!(err, GuidanceError::DegenerateGeometry(_)));
    }

    #[test]
    fn cross_product_is_right_handed() {
        let z = Vec3::new(1.0, 0.0, 0.0).cross(Vec3::new(0.0, 1.0, 0.0));
        assert_vec_close(z, Vec3::new(0.0, 0.0, 1.0), 1e-12);
    }

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_identity_rotate_is_noop() {
        let r = Quaternion::identity().rotate(Vec3::new(1.0, 2.0, 3.0));
        assert_vec_close(r, Vec3::new(1.0, 2.0, 3.0), 1e-12);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert_vec_close(r, Vec3::new(0.0, 1.0, 0.0), 1e-12);
    }

    #[test]
    fn rotation_preserves_unit_length() {
        let v = Vec3::new(0.2, -0.7, 1.9).normalize().unwrap();
        for q in sample_quaternions() {
            assert!((q.rotate(v).length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn composition_is_order_sensitive() {
        let yaw = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2);
        let roll = Quaternion::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), FRAC_PI_2);
        let v = Vec3::new(0.0, 1.0, 0.0);

        // roll first, then yaw.
        let a = yaw.mul(roll).rotate(v);
        assert_vec_close(a, yaw.rotate(roll.rotate(v)), 1e-12);

        let b = roll.mul(yaw).rotate(v);
        assert!(a.distance_to(b) > 0.5, "composition must not commute");
    }

    #[test]
    fn quaternion_inverse_undoes_rotation() {
        for q in sample_quaternions() {
            let prod = q.mul(q.inverse().unwrap());
            assert!((prod.w.abs() - 1.0).abs() < 1e-12);
            assert!(prod.x.abs() < 1e-12 && prod.y.abs() < 1e-12 && prod.z.abs() < 1e-12);
        }
    }

    #[test]
    fn inverse_of_non_unit_quaternion_divides_by_norm_squared() {
        let q = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        let inv = q.inverse().unwrap();
        assert!((inv.w - 0.5).abs() < 1e-12);
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).inverse().is_err());
    }

    #[test]
    fn xyzw_order_roundtrips() {
        let q = Quaternion::from_xyzw([0.1, 0.2, 0.3, 0.9]);
        assert_eq!(q.w, 0.9);
        assert_eq!(q.to_xyzw(), [0.1, 0.2, 0.3, 0.9]);
    }

    // ── Matrix4 ─────────────────────────────────────────────────────────────

    #[test]
    fn column_major_transcription() {
        // Column 1 is (0, 0, -1): y maps to -z.
        let m = Matrix4::from_column_major([
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ]);
        assert_vec_close(
            m.transform_point(Vec3::new(0.0, 1.0, 0.0)),
            Vec3::new(0.0, 0.0, -1.0),
            1e-12,
        );
        assert_eq!(Matrix4::from_column_major(m.to_column_major()), m);
    }

    #[test]
    fn matrix_inverse_recovers_identity() {
        let m = Matrix4::from_trs(
            Vec3::new(1.0, -2.0, 0.5),
            Quaternion::new(0.3, -0.5, 0.7, 0.1).normalize().unwrap(),
            Vec3::new(2.0, 0.5, 1.5),
        );
        let prod = m.mul(&m.inverse().unwrap());
        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert!((prod.m[row][col] - expected).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn singular_matrix_inverse_is_an_error() {
        let mut m = Matrix4::identity();
        m.m[2][2] = 0.0;
        assert!(matches!(
            m.inverse(),
            Err(GuidanceError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn rotation_extraction_strips_scale() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.4);
        let m = Matrix4::from_trs(Vec3::zero(), q, Vec3::new(3.0, 3.0, 3.0));
        let back = m.rotation().unwrap();
        assert!((back.dot(q).abs() - 1.0).abs() < 1e-9);
        assert_vec_close(m.scale(), Vec3::new(3.0, 3.0, 3.0), 1e-9);
    }

    #[test]
    fn rotation_extraction_repairs_drift() {
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), 0.3);
        let mut m = Pose::new(Vec3::zero(), q, FrameId::World).to_matrix();
        m.m[0][1] += 1e-4;
        let back = m.rotation().unwrap();
        assert!((back.norm() - 1.0).abs() < 1e-12);
        assert!((back.dot(q).abs() - 1.0).abs() < 1e-6);
    }

    // ── Pose ────────────────────────────────────────────────────────────────

    #[test]
    fn pose_matrix_roundtrip() {
        for (i, q) in sample_quaternions().into_iter().enumerate() {
            let p = Pose::new(Vec3::new(i as f64, -2.5, 0.25), q, FrameId::World);
            let back = Pose::from_matrix(&p.to_matrix(), FrameId::World).unwrap();
            assert_vec_close(back.position, p.position, 1e-12);
            assert!(
                (back.orientation.dot(q).abs() - 1.0).abs() < 1e-6,
                "orientation mismatch for {q:?}: {:?}",
                back.orientation
            );
        }
    }

    #[test]
    fn pose_compose_matches_matrix_product() {
        let a = Pose::new(
            Vec3::new(1.0, 0.0, 0.0),
            Quaternion::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), FRAC_PI_2),
            FrameId::World,
        );
        let b = Pose::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity(), FrameId::Device);
        let composed = a.compose(&b);
        assert_eq!(composed.frame, FrameId::World);
        assert_vec_close(composed.position, Vec3::new(1.0, 1.0, 0.0), 1e-12);

        let via_matrix = a.to_matrix().mul(&b.to_matrix());
        assert_vec_close(via_matrix.translation(), composed.position, 1e-12);
    }

    #[test]
    fn pose_serializes_with_frame_tag() {
        let p = Pose::identity(FrameId::RenderCamera);
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("RenderCamera"));
    }
}
