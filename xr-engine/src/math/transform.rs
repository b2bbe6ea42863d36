//! Rigid transforms for scene objects and anchors

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::{Quat, Vec3};

/// Position, rotation and scale. Padded to the renderer's uniform layout.
///
/// Writers replace the whole value; there are no per-field updates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    #[serde(skip)]
    pub _pad1: f32,
    pub rotation: Quat,
    pub scale: Vec3,
    #[serde(skip)]
    pub _pad3: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        _pad1: 0.0,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
        _pad3: 0.0,
    };

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            _pad1: 0.0,
            rotation,
            scale,
            _pad3: 0.0,
        }
    }

    pub fn with_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Every component is a finite number and the rotation is not degenerate.
    pub fn is_fully_specified(&self) -> bool {
        self.position.is_finite()
            && self.rotation.is_finite()
            && self.rotation.length() > 1e-6
            && self.scale.is_finite()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position and orientation without scale, as delivered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { position, orientation }
    }

    pub fn at(position: Vec3) -> Self {
        Self { position, orientation: Quat::IDENTITY }
    }
}
