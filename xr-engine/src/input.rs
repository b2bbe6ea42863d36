//! Per-frame data delivered by the platform: views, input sources, hands

use serde::{Deserialize, Serialize};

use crate::math::{Pose, Quat, Vec3};
use crate::session::ReferenceSpaceType;

pub type InputSourceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewEye {
    None,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XrView {
    pub eye: ViewEye,
    pub transform: Pose,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GamepadButton {
    pub pressed: bool,
    pub touched: bool,
    pub value: f32,
}

impl GamepadButton {
    pub fn pressed() -> Self {
        Self {
            pressed: true,
            touched: true,
            value: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Gamepad {
    pub buttons: Vec<GamepadButton>,
    pub axes: Vec<f32>,
}

/// Subset of the articulated hand joints used for pose and gesture extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandJoint {
    Wrist,
    ThumbTip,
    IndexTip,
    MiddleTip,
    RingTip,
    PinkyTip,
}

impl HandJoint {
    pub const COUNT: usize = 6;

    pub const FINGERTIPS: [HandJoint; 5] = [
        HandJoint::ThumbTip,
        HandJoint::IndexTip,
        HandJoint::MiddleTip,
        HandJoint::RingTip,
        HandJoint::PinkyTip,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Dense joint table, `None` where the runtime lost the joint this frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandSkeleton {
    joints: [Option<Pose>; HandJoint::COUNT],
}

impl HandSkeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_joint(mut self, joint: HandJoint, pose: Pose) -> Self {
        self.set(joint, pose);
        self
    }

    pub fn set(&mut self, joint: HandJoint, pose: Pose) {
        self.joints[joint.index()] = Some(pose);
    }

    pub fn get(&self, joint: HandJoint) -> Option<Pose> {
        self.joints[joint.index()]
    }

    pub fn position(&self, joint: HandJoint) -> Option<Vec3> {
        self.get(joint).map(|p| p.position)
    }

    pub fn is_complete(&self) -> bool {
        self.joints.iter().all(Option::is_some)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSource {
    pub id: InputSourceId,
    /// `None` for gaze or screen input without a hand.
    pub handedness: Option<Hand>,
    pub target_ray: Option<Pose>,
    pub grip: Option<Pose>,
    pub hand: Option<HandSkeleton>,
    pub gamepad: Option<Gamepad>,
    pub linear_velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    pub has_haptics: bool,
}

impl InputSource {
    pub fn new(id: InputSourceId, handedness: Option<Hand>) -> Self {
        Self {
            id,
            handedness,
            target_ray: None,
            grip: None,
            hand: None,
            gamepad: None,
            linear_velocity: None,
            angular_velocity: None,
            has_haptics: false,
        }
    }

    /// Tracked controller with a pointer ray, a gamepad and an actuator.
    pub fn controller(id: InputSourceId, hand: Hand, ray: Pose) -> Self {
        Self {
            target_ray: Some(ray),
            grip: Some(ray),
            gamepad: Some(Gamepad::default()),
            has_haptics: true,
            ..Self::new(id, Some(hand))
        }
    }

    pub fn tracked_hand(id: InputSourceId, hand: Hand, skeleton: HandSkeleton) -> Self {
        Self {
            hand: Some(skeleton),
            ..Self::new(id, Some(hand))
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<GamepadButton>) -> Self {
        self.gamepad.get_or_insert_with(Gamepad::default).buttons = buttons;
        self
    }

    /// Best available position for gestures originating from this source.
    pub fn origin(&self) -> Option<Pose> {
        self.target_ray
            .or(self.grip)
            .or_else(|| self.hand.as_ref().and_then(|h| h.get(HandJoint::Wrist)))
    }
}

/// One platform frame callback's worth of data
#[derive(Debug, Clone, PartialEq)]
pub struct XrFrame {
    /// Host clock in milliseconds.
    pub time: f64,
    /// The first view is the primary (head) view.
    pub views: Vec<XrView>,
    pub input_sources: Vec<InputSource>,
    /// Gaze pose when the runtime exposes eye tracking directly.
    pub gaze: Option<Pose>,
}

impl XrFrame {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            views: Vec::new(),
            input_sources: Vec::new(),
            gaze: None,
        }
    }

    pub fn with_head(mut self, pose: Pose) -> Self {
        self.views.push(XrView {
            eye: ViewEye::None,
            transform: pose,
        });
        self
    }

    pub fn with_input(mut self, source: InputSource) -> Self {
        self.input_sources.push(source);
        self
    }

    pub fn with_gaze(mut self, pose: Pose) -> Self {
        self.gaze = Some(pose);
        self
    }

    pub fn primary_view(&self) -> Option<&XrView> {
        self.views.first()
    }
}

/// Coordinate frame poses are expressed in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSpace {
    pub kind: ReferenceSpaceType,
    /// Origin of this space expressed in the platform's native space.
    pub origin_offset: Pose,
}

impl ReferenceSpace {
    pub fn new(kind: ReferenceSpaceType) -> Self {
        Self {
            kind,
            origin_offset: Pose::new(Vec3::ZERO, Quat::IDENTITY),
        }
    }

    pub fn with_offset(kind: ReferenceSpaceType, origin_offset: Pose) -> Self {
        Self { kind, origin_offset }
    }

    /// Re-express a native pose relative to this space's origin.
    pub fn localize(&self, pose: Pose) -> Pose {
        let inverse = self.origin_offset.orientation.conjugate();
        Pose {
            position: inverse.rotate_vector(pose.position - self.origin_offset.position),
            orientation: (inverse * pose.orientation).normalize(),
        }
    }
}

impl Default for ReferenceSpace {
    fn default() -> Self {
        Self::new(ReferenceSpaceType::default())
    }
}
