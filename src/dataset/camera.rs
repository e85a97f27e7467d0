//! Camera model used during dataset acquisition.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use nalgebra::{Matrix3, Vector3, Vector4};
use roxmltree::{Document, Node};

use crate::geometry::SE3;

/// Pinhole camera with a fixed world-to-camera transform.
///
/// The world frame is the motion-capture reference frame, so
/// `world_to_camera` maps ground-truth positions into camera coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub width: u32,
    pub height: u32,
    pub k: Matrix3<f64>,
    pub world_to_camera: SE3,
}

impl Camera {
    /// Rotation of the extrinsic as `(axis_x, axis_y, axis_z, angle)`.
    pub fn rvec(&self) -> Vector4<f64> {
        self.world_to_camera.rotation_axis_angle_4()
    }

    /// Translation of the extrinsic, padded with a trailing 0.
    pub fn tvec(&self) -> Vector4<f64> {
        self.world_to_camera.translation_4()
    }
}

/// Anything able to produce the acquisition camera.
pub trait CameraProvider {
    fn load_camera(&self) -> Result<Camera>;
}

/// Reads the camera from the motion-capture calibration (`.xcp`).
///
/// The file lists every calibrated device under `<Cameras>`; the video
/// camera is the last `<Camera>` whose `TYPE` starts with `DCAM`. Its first
/// `<KeyFrame>` carries the intrinsics, the `ORIENTATION` quaternion
/// `x y z w` (world-to-camera rotation) and the camera centre `POSITION`.
#[derive(Debug, Clone)]
pub struct XcpCamera<'a> {
    path: &'a Path,
}

impl<'a> XcpCamera<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path }
    }
}

impl CameraProvider for XcpCamera<'_> {
    fn load_camera(&self) -> Result<Camera> {
        let text = fs::read_to_string(self.path)
            .with_context(|| format!("Failed to read camera file {:?}", self.path))?;
        parse_xcp(&text).with_context(|| format!("Failed to parse camera file {:?}", self.path))
    }
}

/// Parse the video camera out of an `.xcp` calibration document.
pub fn parse_xcp(text: &str) -> Result<Camera> {
    let doc = Document::parse(text)?;
    let cameras = doc
        .root()
        .children()
        .find(|n| n.has_tag_name("Cameras"))
        .ok_or_else(|| anyhow!("no <Cameras> element"))?;

    let camera = cameras
        .children()
        .filter(|n| n.has_tag_name("Camera"))
        .filter(|n| n.attribute("TYPE").is_some_and(|t| t.starts_with("DCAM")))
        .last()
        .ok_or_else(|| anyhow!("no DCAM camera"))?;

    let [width, height] = values::<u32, 2>(camera, "SENSOR_SIZE")?;
    if width == 0 || height == 0 {
        bail!("invalid sensor size {}x{}", width, height);
    }

    let key_frame = camera
        .children()
        .filter(|n| n.has_tag_name("KeyFrames"))
        .last()
        .and_then(|n| n.children().find(|c| c.has_tag_name("KeyFrame")))
        .ok_or_else(|| anyhow!("camera has no <KeyFrame>"))?;

    let [f] = values::<f64, 1>(key_frame, "FOCAL_LENGTH")?;
    let [cx, cy] = values::<f64, 2>(key_frame, "PRINCIPAL_POINT")?;
    let orientation = values::<f64, 4>(key_frame, "ORIENTATION")?;
    let position = values::<f64, 3>(key_frame, "POSITION")?;

    if orientation.iter().map(|v| v * v).sum::<f64>() < 1e-18 {
        bail!("camera orientation quaternion is zero");
    }

    let k = Matrix3::new(f, 0.0, cx, 0.0, f, cy, 0.0, 0.0, 1.0);

    // t = -R * c
    let rotation = SE3::from_quaternion_xyzw(orientation, Vector3::zeros()).rotation;
    let centre = Vector3::from(position);
    let world_to_camera = SE3::new(rotation, -(rotation * centre));

    Ok(Camera {
        width,
        height,
        k,
        world_to_camera,
    })
}

/// Leading `N` whitespace-separated values of an attribute.
fn values<T: FromStr, const N: usize>(node: Node, name: &str) -> Result<[T; N]> {
    let raw = node
        .attribute(name)
        .ok_or_else(|| anyhow!("missing attribute {}", name))?;
    let parsed = raw
        .split_whitespace()
        .take(N)
        .map(|v| v.parse::<T>().map_err(|_| anyhow!("bad {} value {:?}", name, v)))
        .collect::<Result<Vec<_>>>()?;
    parsed
        .try_into()
        .map_err(|_| anyhow!("{} needs {} values, found {:?}", name, N, raw))
}
