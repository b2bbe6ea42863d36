//! 3D math for poses, anchors and scene transforms

pub mod vec3;
pub mod quat;
pub mod transform;

pub use vec3::*;
pub use quat::*;
pub use transform::*;
