//! Replay state machine: `Stopped` or `Running(mode)`.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// How replay steps are scheduled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The caller drives playback with `trigger()`.
    #[default]
    Cooperative,
    /// A dedicated worker thread steps until end of stream or `stop()`.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayState {
    #[default]
    Stopped,
    Running(Mode),
}

impl ReplayState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running(_))
    }

    fn encode(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Running(Mode::Cooperative) => 1,
            Self::Running(Mode::Background) => 2,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            1 => Self::Running(Mode::Cooperative),
            2 => Self::Running(Mode::Background),
            _ => Self::Stopped,
        }
    }
}

/// What a single `trigger()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not running, or nobody is subscribed; nothing was read.
    Idle,
    /// Text samples were consumed but this sample is dropped to pair the
    /// text channels with the half-rate image channel.
    Decimated,
    /// A sample was fused and handed to the subscribers.
    Dispatched,
    /// A source ran out (or held a malformed record); playback stopped.
    EndOfStream,
}

/// Replay state shared between the owner and the worker thread.
#[derive(Debug, Default)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: ReplayState) -> Self {
        Self(AtomicU8::new(state.encode()))
    }

    pub fn load(&self) -> ReplayState {
        ReplayState::decode(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: ReplayState) {
        self.0.store(state.encode(), Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.load().is_running()
    }

    /// Move to `Stopped`, returning the state it left.
    pub fn stop(&self) -> ReplayState {
        ReplayState::decode(self.0.swap(ReplayState::Stopped.encode(), Ordering::SeqCst))
    }
}
