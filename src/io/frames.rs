//! Image-sequence readers advanced one frame per replay step.
//!
//! Sequences are addressed by a printf-style pattern such as
//! `frames/%08d.jpg`. An empty or undecodable frame is the end-of-stream
//! signal; readers never fail mid-sequence.

use std::path::PathBuf;

use anyhow::{Result, bail};
use image::DynamicImage;
use tracing::{debug, warn};

/// Highest index probed when looking for the first frame of a sequence.
const MAX_FIRST_INDEX: u64 = 100;

/// Source of decoded frames.
pub trait FrameSource: Send + 'static {
    type Frame: Send + 'static;

    /// Open the sequence described by `pattern`.
    fn open(&mut self, pattern: &str) -> Result<()>;

    /// Next frame, or `None` once the sequence is exhausted.
    fn next_frame(&mut self) -> Option<Self::Frame>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// A printf-style `%d` / `%0Nd` file name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePattern {
    prefix: String,
    suffix: String,
    width: usize,
}

impl FramePattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let Some(start) = pattern.rfind('%') else {
            bail!("frame pattern {:?} has no %d placeholder", pattern);
        };
        let conversion = &pattern[start + 1..];
        let Some(end) = conversion.find('d') else {
            bail!("frame pattern {:?} has no %d placeholder", pattern);
        };

        let digits = &conversion[..end];
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            bail!("unsupported placeholder in frame pattern {:?}", pattern);
        }
        let width = if digits.is_empty() { 0 } else { digits.parse()? };

        Ok(Self {
            prefix: pattern[..start].to_string(),
            suffix: conversion[end + 1..].to_string(),
            width,
        })
    }

    pub fn path(&self, index: u64) -> PathBuf {
        PathBuf::from(format!(
            "{}{:0width$}{}",
            self.prefix,
            index,
            self.suffix,
            width = self.width
        ))
    }
}

/// Reads numbered image files with the `image` crate.
#[derive(Debug, Default)]
pub struct ImageSequence {
    pattern: Option<FramePattern>,
    next_index: u64,
}

impl ImageSequence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSource for ImageSequence {
    type Frame = DynamicImage;

    fn open(&mut self, pattern: &str) -> Result<()> {
        let parsed = FramePattern::parse(pattern)?;
        let Some(first) = (0..=MAX_FIRST_INDEX).find(|&i| parsed.path(i).is_file()) else {
            bail!("no frames matching {:?}", pattern);
        };
        debug!(pattern, first, "opened image sequence");
        self.pattern = Some(parsed);
        self.next_index = first;
        Ok(())
    }

    fn next_frame(&mut self) -> Option<DynamicImage> {
        let pattern = self.pattern.as_ref()?;
        let path = pattern.path(self.next_index);
        if !path.is_file() {
            debug!(path = %path.display(), "end of image sequence");
            return None;
        }
        match image::open(&path) {
            Ok(frame) => {
                self.next_index += 1;
                Some(frame)
            }
            Err(e) => {
                warn!(path = %path.display(), "failed to decode frame: {}", e);
                None
            }
        }
    }

    fn close(&mut self) {
        self.pattern = None;
        self.next_index = 0;
    }

    fn is_open(&self) -> bool {
        self.pattern.is_some()
    }
}

#[cfg(feature = "opencv")]
pub use capture::VideoCaptureSource;

#[cfg(feature = "opencv")]
mod capture {
    use anyhow::{Context, Result, bail};
    use opencv::core::Mat;
    use opencv::prelude::*;
    use opencv::videoio::{self, VideoCapture};
    use tracing::warn;

    use super::FrameSource;

    /// Image sequence decoded through OpenCV's `CAP_IMAGES` backend.
    #[derive(Default)]
    pub struct VideoCaptureSource {
        capture: Option<VideoCapture>,
    }

    impl VideoCaptureSource {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl FrameSource for VideoCaptureSource {
        type Frame = Mat;

        fn open(&mut self, pattern: &str) -> Result<()> {
            let capture = VideoCapture::from_file(pattern, videoio::CAP_IMAGES)
                .with_context(|| format!("Failed to open video capture {}", pattern))?;
            if !capture.is_opened()? {
                bail!("video capture {} did not open", pattern);
            }
            self.capture = Some(capture);
            Ok(())
        }

        fn next_frame(&mut self) -> Option<Mat> {
            let capture = self.capture.as_mut()?;
            let mut frame = Mat::default();
            match capture.read(&mut frame) {
                Ok(true) if !frame.empty() => Some(frame),
                Ok(_) => None,
                Err(e) => {
                    warn!("failed to read frame: {}", e);
                    None
                }
            }
        }

        fn close(&mut self) {
            if let Some(mut capture) = self.capture.take() {
                if let Err(e) = capture.release() {
                    warn!("failed to release video capture: {}", e);
                }
            }
        }

        fn is_open(&self) -> bool {
            self.capture.is_some()
        }
    }
}
