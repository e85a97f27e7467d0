//! Geometry utilities: SE3 transforms, closed-form rigid alignment.

pub mod rigid;
pub mod se3;

pub use rigid::{MIN_CORRESPONDENCES, rigid_alignment};
pub use se3::SE3;
