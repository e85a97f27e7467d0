//! Which data sources a replay run has to read.

use bitflags::bitflags;

bitflags! {
    /// Derived once per `start()` from the registered subscribers.
    ///
    /// A source whose flag is clear is neither opened nor read.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u8 {
        /// Frames are decoded from the image sequence.
        const HAS_IMAGE = 0b001;
        /// The euler + translation ground-truth section is read.
        const HAS_SEGMENTS = 0b010;
        /// The raw marker ground-truth section is read.
        const HAS_TRAJECTORIES = 0b100;
    }
}

impl CapabilityFlags {
    /// Any ground-truth text channel is active.
    pub fn has_text(self) -> bool {
        self.intersects(Self::HAS_SEGMENTS | Self::HAS_TRAJECTORIES)
    }

    /// Text channels run at twice the image rate, so when both kinds of
    /// source are active every other text sample is dropped.
    ///
    /// This pairing is a property of the VGM recordings, not a general
    /// synchronization policy.
    pub fn decimates(self) -> bool {
        self.contains(Self::HAS_IMAGE) && self.has_text()
    }
}
