//! VGM dataset sequence: layout, camera, marker model and cached stream offsets.
//!
//! Everything here is resolved once at construction; replay runs only reuse
//! it. Dataset description:
//! <https://www.iit.it/research/lines/visual-geometry-and-modelling/datasets/514-vgm-6d-pose-of-texture-less-objects-dataset>

pub mod camera;
pub mod layout;
pub mod markers;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::io::{SEGMENTS_SECTION, TRAJECTORIES_SECTION, find_stream_pos};

pub use camera::{Camera, CameraProvider, XcpCamera, parse_xcp};
pub use layout::{DEFAULT_FRAME_PATTERN, DatasetLayout};
pub use markers::{MarkerModel, MarkerModelProvider, MarkerScript, parse_marker_script};

/// Byte offsets of the first data line of each ground-truth section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOffsets {
    pub segments: u64,
    pub trajectories: u64,
}

impl StreamOffsets {
    /// Scan the ground-truth log once for both section sentinels.
    pub fn scan(ground_truth: &Path) -> Result<Self> {
        let segments = find_stream_pos(ground_truth, SEGMENTS_SECTION)
            .with_context(|| format!("Failed to scan {:?}", ground_truth))?;
        let trajectories = find_stream_pos(ground_truth, TRAJECTORIES_SECTION)
            .with_context(|| format!("Failed to scan {:?}", ground_truth))?;
        Ok(Self {
            segments,
            trajectories,
        })
    }
}

/// Immutable inputs of a replay engine.
#[derive(Debug, Clone)]
pub struct VgmDataset {
    pub camera: Camera,
    pub markers: MarkerModel,
    pub ground_truth: PathBuf,
    pub frame_pattern: String,
    pub offsets: StreamOffsets,
}

impl VgmDataset {
    /// Load a sequence directory such as `<path_to>/vgm/data/Lshape0001/`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let layout = DatasetLayout::from_sequence_dir(path)?;
        Self::load_layout(&layout)
    }

    /// Load with the default calibration and configuration-script providers.
    pub fn load_layout(layout: &DatasetLayout) -> Result<Self> {
        let camera_path = layout.camera_path();
        let script_path = layout.marker_script_path();
        Self::with_providers(
            layout,
            &XcpCamera::new(&camera_path),
            &MarkerScript::new(&script_path),
        )
    }

    pub fn with_providers(
        layout: &DatasetLayout,
        camera: &dyn CameraProvider,
        markers: &dyn MarkerModelProvider,
    ) -> Result<Self> {
        let camera = camera.load_camera()?;
        let markers = markers.load_markers()?;
        let dataset = Self::new(
            camera,
            markers,
            layout.ground_truth_path(),
            layout.frame_pattern(),
        )?;
        info!(
            name = layout.name(),
            markers = dataset.markers.len(),
            "loaded VGM sequence"
        );
        Ok(dataset)
    }

    /// Assemble from already-parsed inputs, scanning the ground-truth log.
    pub fn new(
        camera: Camera,
        markers: MarkerModel,
        ground_truth: PathBuf,
        frame_pattern: String,
    ) -> Result<Self> {
        let offsets = StreamOffsets::scan(&ground_truth)?;
        let len = std::fs::metadata(&ground_truth)
            .with_context(|| format!("Failed to stat {:?}", ground_truth))?
            .len();
        if offsets.segments == len {
            warn!(path = ?ground_truth, "no {} section, channel will be empty", SEGMENTS_SECTION);
        }
        if offsets.trajectories == len {
            warn!(
                path = ?ground_truth,
                "no {} section, channel will be empty", TRAJECTORIES_SECTION
            );
        }
        Ok(Self {
            camera,
            markers,
            ground_truth,
            frame_pattern,
            offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const XCP: &str = r#"<Cameras VERSION="1.0">
  <Camera SENSOR_SIZE="640 480" TYPE="DCAM">
    <KeyFrames>
      <KeyFrame FOCAL_LENGTH="500" ORIENTATION="0 0 0 1"
                POSITION="0 0 -1000" PRINCIPAL_POINT="320 240" />
    </KeyFrames>
  </Camera>
</Cameras>
"#;

    const SCRIPT: &str = "seq.ReferencePoints = [[0;0;0] [10;0;0] [0;10;0] [0;0;10]];\n";

    const CSV: &str = "Segments\n100\n,,L\nFrame,Sub Frame,RX,RY,RZ,TX,TY,TZ\n,,deg\n\
                       1,0,0,0,0,0,0,0\n\nTrajectories\n100\n,,L\nFrame,Sub Frame\n,,mm\n\
                       1,0,0,0,0,10,0,0,0,10,0,0,0,10\n";

    fn write_sequence(root: &Path) -> PathBuf {
        let seq = root.join("data").join("L0001");
        fs::create_dir_all(&seq).unwrap();
        fs::create_dir_all(root.join("code").join("conf")).unwrap();
        fs::write(seq.join("L0001.xcp"), XCP).unwrap();
        fs::write(seq.join("L0001.csv"), CSV).unwrap();
        fs::write(root.join("code").join("conf").join("L0001.m"), SCRIPT).unwrap();
        seq
    }

    #[test]
    fn test_load_sequence_directory() {
        let dir = tempfile::tempdir().unwrap();
        let seq = write_sequence(dir.path());

        let dataset = VgmDataset::load(format!("{}/", seq.display())).unwrap();
        assert_eq!(dataset.markers.len(), 4);
        assert_eq!(dataset.camera.width, 640);
        assert!(dataset.frame_pattern.ends_with("frames/%08d.jpg"));
        assert!(CSV[dataset.offsets.segments as usize..].starts_with("1,0,0,0,0,0,0,0\n"));
        assert!(CSV[dataset.offsets.trajectories as usize..].starts_with("1,0,0,0,0,10"));
    }

    #[test]
    fn test_missing_inputs_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let seq = write_sequence(dir.path());

        fs::remove_file(seq.join("L0001.xcp")).unwrap();
        assert!(VgmDataset::load(&seq).is_err());

        let dir = tempfile::tempdir().unwrap();
        let seq = write_sequence(dir.path());
        fs::remove_file(dir.path().join("code").join("conf").join("L0001.m")).unwrap();
        assert!(VgmDataset::load(&seq).is_err());

        let dir = tempfile::tempdir().unwrap();
        let seq = write_sequence(dir.path());
        fs::remove_file(seq.join("L0001.csv")).unwrap();
        assert!(VgmDataset::load(&seq).is_err());
    }
}
