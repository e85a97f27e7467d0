//! Dataset readers: ground-truth line cursors, record decoding, image sequences.

pub mod cursor;
pub mod frames;
pub mod records;

pub use cursor::{SEGMENTS_SECTION, TRAJECTORIES_SECTION, TextCursor, find_stream_pos};
pub use frames::{FramePattern, FrameSource, ImageSequence};
#[cfg(feature = "opencv")]
pub use frames::VideoCaptureSource;
pub use records::{SegmentRecord, TrajectoryRecord};
