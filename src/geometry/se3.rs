//! SE3: 6-DOF rigid transformation (rotation + translation).
//!
//! The dataset and its subscribers speak in axis-angle 4-vectors
//! `(axis_x, axis_y, axis_z, angle)` and translation 4-vectors with a
//! trailing unused zero. `SE3` is the internal value type; the
//! `*_4` helpers convert at the boundary.

use nalgebra::{Matrix3, Rotation3, Unit, UnitQuaternion, Vector3, Vector4};

/// Below this angle a rotation is treated as the identity.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-12;

/// Rigid transformation. Transforms points as: p' = R * p + t
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation (no rotation, no translation).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from a rotation matrix and translation.
    ///
    /// The matrix is assumed orthonormal with determinant +1.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot3 = Rotation3::from_matrix_unchecked(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot3),
            translation,
        }
    }

    /// Construct from quaternion components (x, y, z, w) and translation.
    pub fn from_quaternion_xyzw(q: [f64; 4], translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(q[3], q[0], q[1], q[2]));
        Self {
            rotation,
            translation,
        }
    }

    /// Construct from the 4-vector wire representation.
    ///
    /// `rvec = (axis_x, axis_y, axis_z, angle)`; the axis need not be unit
    /// length. A degenerate axis or zero angle yields the identity rotation.
    /// Only the first three components of `tvec` are used.
    pub fn from_axis_angle_4(rvec: &Vector4<f64>, tvec: &Vector4<f64>) -> Self {
        let axis = Vector3::new(rvec.x, rvec.y, rvec.z);
        let rotation = match Unit::try_new(axis, SMALL_ANGLE_THRESHOLD) {
            Some(axis) => UnitQuaternion::from_axis_angle(&axis, rvec.w),
            None => UnitQuaternion::identity(),
        };
        Self {
            rotation,
            translation: Vector3::new(tvec.x, tvec.y, tvec.z),
        }
    }

    /// Rotation as `(axis_x, axis_y, axis_z, angle)` with a unit axis.
    ///
    /// The identity rotation is reported as `(0, 0, 1, 0)`.
    pub fn rotation_axis_angle_4(&self) -> Vector4<f64> {
        match self.rotation.axis_angle() {
            Some((axis, angle)) if angle.abs() > SMALL_ANGLE_THRESHOLD => {
                Vector4::new(axis.x, axis.y, axis.z, angle)
            }
            _ => Vector4::new(0.0, 0.0, 1.0, 0.0),
        }
    }

    /// Translation padded to 4 components with a trailing 0.
    pub fn translation_4(&self) -> Vector4<f64> {
        Vector4::new(self.translation.x, self.translation.y, self.translation.z, 0.0)
    }

    /// Inverse transformation: [R^T | -R^T * t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: self ∘ other.
    ///
    /// `other` is applied first, then `self`:
    /// [R1 | t1] ∘ [R2 | t2] = [R1*R2 | R1*t2 + t1]
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Transform a single point: p' = R * p + t.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Transform multiple points.
    pub fn transform_points(&self, pts: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        pts.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Get the rotation matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
