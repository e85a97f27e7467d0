//! Closed-form rigid alignment of corresponding 3D point sets.
//!
//! Finds the rotation and translation such that: measured ≈ R * reference + t
//! in the least-squares sense. Scale is fixed to 1 since the marker model
//! and the motion-capture measurements share the same units.

use nalgebra::{Matrix3, Vector3};

use super::SE3;

/// Minimum number of correspondences for a well-posed fit.
pub const MIN_CORRESPONDENCES: usize = 3;

/// Total centered energy below which the point set is considered collapsed.
const DEGENERATE_SPREAD: f64 = 1e-12;

/// Compute the rigid transform mapping `reference` onto `measured`.
///
/// Algorithm (Kabsch / Horn with fixed scale):
/// 1. Compute centroids of both point sets
/// 2. Center the points
/// 3. Cross-covariance H = sum(p_i * q_i^T)
/// 4. SVD: H = U * S * V^T, R = V * U^T (reflection corrected so det(R) = +1)
/// 5. Translation: t = c_q - R * c_p
///
/// # Returns
/// * `None` if the sets differ in length, have fewer than
///   [`MIN_CORRESPONDENCES`] points, either set collapses onto a single point,
///   or the SVD does not converge.
pub fn rigid_alignment(reference: &[Vector3<f64>], measured: &[Vector3<f64>]) -> Option<SE3> {
    let n = reference.len();
    if n < MIN_CORRESPONDENCES || n != measured.len() {
        return None;
    }

    // Step 1: Compute centroids
    let centroid_p = compute_centroid(reference);
    let centroid_q = compute_centroid(measured);

    // Step 2: Center the points
    let centered_p: Vec<_> = reference.iter().map(|p| p - centroid_p).collect();
    let centered_q: Vec<_> = measured.iter().map(|q| q - centroid_q).collect();

    let spread_p: f64 = centered_p.iter().map(|p| p.norm_squared()).sum();
    let spread_q: f64 = centered_q.iter().map(|q| q.norm_squared()).sum();
    if spread_p < DEGENERATE_SPREAD || spread_q < DEGENERATE_SPREAD {
        return None;
    }

    // Step 3: Cross-covariance matrix
    let mut h = Matrix3::zeros();
    for (p, q) in centered_p.iter().zip(centered_q.iter()) {
        h += p * q.transpose();
    }

    // Step 4: Rotation via SVD
    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation_mat = v_t.transpose() * u.transpose();

    // Handle reflection case (det(R) = -1)
    if rotation_mat.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_mat = v * u.transpose();
    }

    let pose = SE3::from_rt(rotation_mat, Vector3::zeros());

    // Step 5: Compute translation
    let translation = centroid_q - pose.rotation * centroid_p;

    Some(SE3 {
        rotation: pose.rotation,
        translation,
    })
}

/// Compute centroid of a set of 3D points.
pub fn compute_centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}
