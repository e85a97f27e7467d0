//! Object pose in the camera frame from ground-truth measurements.
//!
//! The motion-capture system reports the object in its own world frame,
//! either as raw marker positions (trajectories) or as a segment pose
//! (euler angles + translation). Both are turned into a candidate
//! object-to-world transform and composed with the fixed world-to-camera
//! extrinsic:
//!
//! ```text
//! T_cam_obj = T_cam_world ∘ T_world_obj
//! R_out = R_cam * R_candidate
//! t_out = R_cam * t_candidate + t_cam
//! ```

use nalgebra::{UnitQuaternion, Vector3};

use crate::dataset::{Camera, MarkerModel};
use crate::geometry::{SE3, rigid_alignment};
use crate::io::SegmentRecord;

#[derive(Debug, Clone)]
pub struct PoseFusion {
    world_to_camera: SE3,
    reference: Vec<Vector3<f64>>,
}

impl PoseFusion {
    pub fn new(camera: &Camera, markers: &MarkerModel) -> Self {
        Self {
            world_to_camera: camera.world_to_camera,
            reference: markers.points().to_vec(),
        }
    }

    /// Fit the marker model onto `measured` and express the result in the
    /// camera frame. `None` when the fit is degenerate.
    pub fn fuse_markers(&self, measured: &[Vector3<f64>]) -> Option<SE3> {
        let candidate = rigid_alignment(&self.reference, measured)?;
        Some(self.world_to_camera.compose(&candidate))
    }

    /// Express a segment pose in the camera frame.
    pub fn fuse_segment(&self, segment: &SegmentRecord) -> SE3 {
        self.world_to_camera.compose(&segment_pose(segment))
    }
}

/// Segment pose in the world frame.
///
/// Euler angles are in degrees, applied X then Y then Z:
/// R = Rz(ez) * Ry(ey) * Rx(ex).
pub fn segment_pose(segment: &SegmentRecord) -> SE3 {
    let e = segment.euler.map(f64::to_radians);
    SE3::new(
        UnitQuaternion::from_euler_angles(e.x, e.y, e.z),
        segment.translation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn camera(world_to_camera: SE3) -> Camera {
        Camera {
            width: 640,
            height: 480,
            k: Matrix3::identity(),
            world_to_camera,
        }
    }

    fn markers() -> MarkerModel {
        MarkerModel::new(vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(50.0, 0.0, 0.0),
            Vector3::new(0.0, 30.0, 0.0),
            Vector3::new(0.0, 0.0, 20.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_identity_camera_returns_fit() {
        let fusion = PoseFusion::new(&camera(SE3::identity()), &markers());
        let truth = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.3),
            Vector3::new(10.0, 20.0, 1500.0),
        );
        let measured = truth.transform_points(markers().points());

        let pose = fusion.fuse_markers(&measured).unwrap();
        assert_relative_eq!(pose.rotation_matrix(), truth.rotation_matrix(), epsilon = 1e-9);
        assert_relative_eq!(pose.translation, truth.translation, epsilon = 1e-8);
    }

    #[test]
    fn test_camera_extrinsic_applied_after_fit() {
        let extrinsic = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
            Vector3::new(0.0, 0.0, 2000.0),
        );
        let fusion = PoseFusion::new(&camera(extrinsic), &markers());
        let truth = SE3::new(UnitQuaternion::identity(), Vector3::new(100.0, 0.0, 0.0));
        let measured = truth.transform_points(markers().points());

        let pose = fusion.fuse_markers(&measured).unwrap();
        let expected_r = extrinsic.rotation_matrix() * truth.rotation_matrix();
        let expected_t = extrinsic.rotation * truth.translation + extrinsic.translation;
        assert_relative_eq!(pose.rotation_matrix(), expected_r, epsilon = 1e-9);
        assert_relative_eq!(pose.translation, expected_t, epsilon = 1e-8);

        // Every model point lands where the camera sees its measurement
        for (p, q) in markers().points().iter().zip(measured.iter()) {
            assert_relative_eq!(
                pose.transform_point(p),
                extrinsic.transform_point(q),
                epsilon = 1e-8
            );
        }
    }

    #[test]
    fn test_degenerate_measurement() {
        let fusion = PoseFusion::new(&camera(SE3::identity()), &markers());
        assert!(fusion.fuse_markers(&[Vector3::zeros(); 4]).is_none());
        assert!(fusion.fuse_markers(&[Vector3::zeros(); 3]).is_none());
    }

    #[test]
    fn test_segment_pose() {
        let segment = SegmentRecord {
            frame: 1,
            euler: Vector3::new(0.0, 0.0, 90.0),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };
        let pose = segment_pose(&segment);
        assert_relative_eq!(
            pose.transform_point(&Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(1.0, 3.0, 3.0),
            epsilon = 1e-12
        );

        let shift = SE3::new(UnitQuaternion::identity(), Vector3::new(0.0, 0.0, 10.0));
        let fusion = PoseFusion::new(&camera(shift), &markers());
        let fused = fusion.fuse_segment(&segment);
        assert_relative_eq!(fused.translation, Vector3::new(1.0, 2.0, 13.0), epsilon = 1e-12);
    }
}
