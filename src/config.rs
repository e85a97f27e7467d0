//! Replay tool configuration, loaded from YAML.
//!
//! ```yaml
//! dataset: /data/vgm/data/Lshape0001
//! mode: background
//! frame_pattern: frames/%08d.jpg
//! max_steps: 500
//! log_filter: vgm_replay=debug
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dataset::DEFAULT_FRAME_PATTERN;
use crate::grabber::Mode;

pub const DEFAULT_LOG_FILTER: &str = "vgm_replay=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Sequence directory, `<root>/<name>/`.
    pub dataset: PathBuf,
    pub mode: Mode,
    /// Printf-style frame pattern relative to the sequence directory.
    pub frame_pattern: String,
    /// Stop after this many steps; `None` replays to end of stream.
    pub max_steps: Option<usize>,
    pub log_filter: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::new(),
            mode: Mode::default(),
            frame_pattern: DEFAULT_FRAME_PATTERN.to_string(),
            max_steps: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse config {:?}", path))
    }
}
