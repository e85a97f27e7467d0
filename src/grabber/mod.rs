//! Replay engine: subscribers, capability flags, lifecycle and stepping.

pub mod callbacks;
pub mod flags;
pub mod state;
pub mod vgm_grabber;

pub use callbacks::{CallbackRegistry, ImagePoseCallback, MarkersCallback, Signature};
pub use flags::CapabilityFlags;
pub use state::{AtomicState, Mode, ReplayState, StepOutcome};
pub use vgm_grabber::{OpenSources, StopHandle, VgmGrabber};
