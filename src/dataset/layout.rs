//! On-disk naming conventions of a VGM sequence.
//!
//! A sequence directory `<root>/<name>/` holds the ground-truth log
//! `<name>.csv`, the motion-capture calibration `<name>.xcp` and a
//! `frames/` directory. The marker configuration scripts live next to the
//! data in `<root>/../code/conf/<name>.m`.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, bail};

/// Default frame file pattern, relative to the sequence directory.
pub const DEFAULT_FRAME_PATTERN: &str = "frames/%08d.jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
    name: String,
    frame_pattern: String,
}

impl DatasetLayout {
    /// Infer root and sequence name from the sequence directory path.
    ///
    /// Trailing separators are ignored: `data/Lshape0001/` gives root `data`
    /// and name `Lshape0001`.
    pub fn from_sequence_dir<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut components: Vec<Component> = path.components().collect();
        while matches!(components.last(), Some(Component::CurDir)) {
            components.pop();
        }

        let name = match components.pop() {
            Some(Component::Normal(name)) => name.to_string_lossy().into_owned(),
            _ => bail!("cannot infer sequence name from {:?}", path),
        };
        let root: PathBuf = components.iter().collect();
        let root = if root.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            root
        };

        Ok(Self {
            root,
            name,
            frame_pattern: DEFAULT_FRAME_PATTERN.to_string(),
        })
    }

    pub fn with_frame_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.frame_pattern = pattern.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Ground-truth log holding both the segments and trajectories sections.
    pub fn ground_truth_path(&self) -> PathBuf {
        self.sequence_dir().join(format!("{}.csv", self.name))
    }

    pub fn camera_path(&self) -> PathBuf {
        self.sequence_dir().join(format!("{}.xcp", self.name))
    }

    pub fn marker_script_path(&self) -> PathBuf {
        self.root
            .join("..")
            .join("code")
            .join("conf")
            .join(format!("{}.m", self.name))
    }

    /// Full printf-style frame pattern.
    pub fn frame_pattern(&self) -> String {
        self.sequence_dir()
            .join(&self.frame_pattern)
            .to_string_lossy()
            .into_owned()
    }
}
