//! Subscriber registry keyed by the fixed set of callback signatures.
//!
//! Each signature has its own strongly-typed list; closures are invoked in
//! registration order, synchronously, on whichever thread runs the step.

use nalgebra::{Vector3, Vector4};

use super::flags::CapabilityFlags;

/// The shapes of data a subscriber can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signature {
    /// `(frame id, frame, rotation axis-angle, translation)`
    ImagePose,
    /// `(frame id, measured markers)`
    Markers,
}

/// Receives a frame with the camera-frame object pose.
pub type ImagePoseCallback<F> =
    Box<dyn FnMut(u64, &F, &Vector4<f64>, &Vector4<f64>) + Send + 'static>;

/// Receives the raw marker positions of a frame.
pub type MarkersCallback = Box<dyn FnMut(u64, &[Vector3<f64>]) + Send + 'static>;

pub struct CallbackRegistry<F> {
    image_pose: Vec<ImagePoseCallback<F>>,
    markers: Vec<MarkersCallback>,
}

impl<F> Default for CallbackRegistry<F> {
    fn default() -> Self {
        Self {
            image_pose: Vec::new(),
            markers: Vec::new(),
        }
    }
}

impl<F> CallbackRegistry<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_image_pose<C>(&mut self, callback: C)
    where
        C: FnMut(u64, &F, &Vector4<f64>, &Vector4<f64>) + Send + 'static,
    {
        self.image_pose.push(Box::new(callback));
    }

    pub fn register_markers<C>(&mut self, callback: C)
    where
        C: FnMut(u64, &[Vector3<f64>]) + Send + 'static,
    {
        self.markers.push(Box::new(callback));
    }

    pub fn has_subscribers(&self, signature: Signature) -> bool {
        self.len(signature) > 0
    }

    pub fn len(&self, signature: Signature) -> usize {
        match signature {
            Signature::ImagePose => self.image_pose.len(),
            Signature::Markers => self.markers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.image_pose.is_empty() && self.markers.is_empty()
    }

    /// Which sources must be read to serve the current subscribers.
    ///
    /// Image + pose subscribers need frames and segments; marker
    /// subscribers need trajectories.
    pub fn flags(&self) -> CapabilityFlags {
        let mut flags = CapabilityFlags::empty();
        if self.has_subscribers(Signature::ImagePose) {
            flags |= CapabilityFlags::HAS_IMAGE | CapabilityFlags::HAS_SEGMENTS;
        }
        if self.has_subscribers(Signature::Markers) {
            flags |= CapabilityFlags::HAS_TRAJECTORIES;
        }
        flags
    }

    pub fn dispatch_image_pose(
        &mut self,
        id: u64,
        frame: &F,
        rvec: &Vector4<f64>,
        tvec: &Vector4<f64>,
    ) {
        for callback in &mut self.image_pose {
            callback(id, frame, rvec, tvec);
        }
    }

    pub fn dispatch_markers(&mut self, id: u64, markers: &[Vector3<f64>]) {
        for callback in &mut self.markers {
            callback(id, markers);
        }
    }
}
