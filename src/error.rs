//! Error types for record decoding and playback setup.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A ground-truth line that does not match its fixed layout.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("empty record")]
    Empty,

    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("field {index} is not a number: {value:?}")]
    Field { index: usize, value: String },

    #[error("unreadable record: {0}")]
    Csv(String),
}

/// Failure reported synchronously by `VgmGrabber::start`.
#[derive(Debug, Error)]
pub enum GrabberError {
    #[error("grabber is already running")]
    AlreadyRunning,

    #[error("failed to open frame sequence {pattern}")]
    OpenFrames {
        pattern: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to open ground truth file {path}")]
    OpenGroundTruth {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn replay worker")]
    Spawn(#[source] io::Error),
}
