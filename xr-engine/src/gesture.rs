//! Gesture values, acceptance floor, reclassification and joint-based recognition

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::input::{Hand, HandJoint, HandSkeleton};
use crate::math::Vec3;

/// Gestures below this confidence are noise, not recoverable errors.
pub const GESTURE_CONFIDENCE_FLOOR: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureType {
    Point,
    Grab,
    Pinch,
    Swipe,
    Tap,
    Hold,
    Custom,
}

impl fmt::Display for GestureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GestureType::Point => "point",
            GestureType::Grab => "grab",
            GestureType::Pinch => "pinch",
            GestureType::Swipe => "swipe",
            GestureType::Tap => "tap",
            GestureType::Hold => "hold",
            GestureType::Custom => "custom",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gesture {
    pub gesture_type: GestureType,
    pub confidence: f32,
    pub position: Vec3,
    pub direction: Option<Vec3>,
    pub magnitude: Option<f32>,
    pub duration_ms: f64,
    pub handedness: Hand,
    pub timestamp: f64,
}

impl Gesture {
    pub fn new(gesture_type: GestureType, handedness: Hand, confidence: f32, timestamp: f64) -> Self {
        Self {
            gesture_type,
            confidence,
            position: Vec3::ZERO,
            direction: None,
            magnitude: None,
            duration_ms: 0.0,
            handedness,
            timestamp,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_direction(mut self, direction: Vec3) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_magnitude(mut self, magnitude: f32) -> Self {
        self.magnitude = Some(magnitude);
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.confidence >= GESTURE_CONFIDENCE_FLOOR
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Custom gestures above this magnitude become `Grab`.
    pub custom_grab_magnitude: f32,
    /// Custom gestures above this magnitude become `Point`.
    pub custom_point_magnitude: f32,
    /// Taps held at least this long become `Hold`.
    pub hold_threshold_ms: f64,
    /// Age after which a gesture leaves the active working set.
    pub active_timeout_ms: f64,
    pub history_capacity: usize,
    /// Thumb to index tip distance for a pinch, meters.
    pub pinch_threshold_m: f32,
    /// Mean fingertip to wrist distance for a closed fist, meters.
    pub grab_threshold_m: f32,
    /// Index tip to wrist distance for an extended index finger, meters.
    pub point_extension_m: f32,
    pub joint_gesture_confidence: f32,
    pub button_tap_confidence: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            custom_grab_magnitude: 0.8,
            custom_point_magnitude: 0.5,
            hold_threshold_ms: 500.0,
            active_timeout_ms: 5_000.0,
            history_capacity: 100,
            pinch_threshold_m: 0.025,
            grab_threshold_m: 0.09,
            point_extension_m: 0.14,
            joint_gesture_confidence: 0.9,
            button_tap_confidence: 1.0,
        }
    }
}

/// Map a raw gesture to the type used for interaction matching.
pub fn reclassify(mut gesture: Gesture, config: &GestureConfig) -> Gesture {
    let original = gesture.gesture_type;
    match gesture.gesture_type {
        GestureType::Custom => {
            let magnitude = gesture.magnitude.unwrap_or(0.0);
            if magnitude > config.custom_grab_magnitude {
                gesture.gesture_type = GestureType::Grab;
            } else if magnitude > config.custom_point_magnitude {
                gesture.gesture_type = GestureType::Point;
            }
        }
        GestureType::Tap if gesture.duration_ms >= config.hold_threshold_ms => {
            gesture.gesture_type = GestureType::Hold;
        }
        _ => {}
    }
    if gesture.gesture_type != original {
        trace!(from = %original, to = %gesture.gesture_type, "gesture reclassified");
    }
    gesture
}

/// Bounded ring of accepted gestures, oldest evicted first
#[derive(Debug, Clone)]
pub struct GestureHistory {
    entries: VecDeque<Gesture>,
    capacity: usize,
}

impl GestureHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, gesture: Gesture) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(gesture);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&Gesture> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gesture> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Static hand pose from the joint layout, if any.
pub fn classify_hand(skeleton: &HandSkeleton, config: &GestureConfig) -> Option<GestureType> {
    let wrist = skeleton.position(HandJoint::Wrist)?;
    let thumb = skeleton.position(HandJoint::ThumbTip)?;
    let index = skeleton.position(HandJoint::IndexTip)?;

    if thumb.distance(index) < config.pinch_threshold_m {
        return Some(GestureType::Pinch);
    }

    let curled = [HandJoint::MiddleTip, HandJoint::RingTip, HandJoint::PinkyTip]
        .iter()
        .map(|joint| skeleton.position(*joint).map(|p| p.distance(wrist)))
        .collect::<Option<Vec<f32>>>()?;
    let curled_mean = curled.iter().sum::<f32>() / curled.len() as f32;
    let index_reach = index.distance(wrist);

    if curled_mean < config.grab_threshold_m {
        if index_reach < config.grab_threshold_m {
            return Some(GestureType::Grab);
        }
        if index_reach > config.point_extension_m {
            return Some(GestureType::Point);
        }
    }
    None
}

/// Button transitions observed in one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ButtonEdges {
    pub pressed: Vec<usize>,
    /// Released buttons with how long they were held, ms.
    pub released: Vec<(usize, f64)>,
}

/// Per-input-source edge state used to synthesize gestures from raw input
#[derive(Debug, Clone, Default)]
pub struct SourceGestureState {
    /// Press time of each button that is currently down.
    buttons_down: Vec<Option<f64>>,
    hand_pose: Option<GestureType>,
}

impl SourceGestureState {
    pub fn button_edges(&mut self, pressed: &[bool], time: f64) -> ButtonEdges {
        let mut edges = ButtonEdges::default();
        if self.buttons_down.len() < pressed.len() {
            self.buttons_down.resize(pressed.len(), None);
        }
        for (i, slot) in self.buttons_down.iter_mut().enumerate() {
            let now = pressed.get(i).copied().unwrap_or(false);
            match (*slot, now) {
                (None, true) => {
                    *slot = Some(time);
                    edges.pressed.push(i);
                }
                (Some(since), false) => {
                    *slot = None;
                    edges.released.push((i, time - since));
                }
                _ => {}
            }
        }
        edges
    }

    /// The hand pose when it differs from the previous frame's.
    pub fn hand_pose_edge(&mut self, detected: Option<GestureType>) -> Option<GestureType> {
        if detected == self.hand_pose {
            return None;
        }
        self.hand_pose = detected;
        detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Pose;

    fn hand(tips: [Vec3; 5]) -> HandSkeleton {
        let mut skeleton = HandSkeleton::new().with_joint(HandJoint::Wrist, Pose::at(Vec3::ZERO));
        for (joint, tip) in HandJoint::FINGERTIPS.iter().zip(tips) {
            skeleton.set(*joint, Pose::at(tip));
        }
        skeleton
    }

    #[test]
    fn test_confidence_floor_is_inclusive() {
        assert!(!Gesture::new(GestureType::Tap, Hand::Right, 0.69, 0.0).is_accepted());
        assert!(Gesture::new(GestureType::Tap, Hand::Right, 0.70, 0.0).is_accepted());
    }

    #[test]
    fn test_custom_reclassification_thresholds() {
        let config = GestureConfig::default();
        let custom = |m| Gesture::new(GestureType::Custom, Hand::Left, 0.9, 0.0).with_magnitude(m);

        assert_eq!(reclassify(custom(0.9), &config).gesture_type, GestureType::Grab);
        assert_eq!(reclassify(custom(0.6), &config).gesture_type, GestureType::Point);
        assert_eq!(reclassify(custom(0.5), &config).gesture_type, GestureType::Custom);
        assert_eq!(reclassify(custom(0.8), &config).gesture_type, GestureType::Point);
    }

    #[test]
    fn test_long_tap_becomes_hold() {
        let config = GestureConfig::default();
        let tap = Gesture::new(GestureType::Tap, Hand::Right, 1.0, 0.0).with_duration(650.0);
        assert_eq!(reclassify(tap, &config).gesture_type, GestureType::Hold);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = GestureHistory::new(100);
        for i in 0..105 {
            history.push(Gesture::new(GestureType::Tap, Hand::Left, 1.0, i as f64));
        }
        assert_eq!(history.len(), 100);
        assert_eq!(history.iter().next().unwrap().timestamp, 5.0);
        assert_eq!(history.latest().unwrap().timestamp, 104.0);
    }

    #[test]
    fn test_classify_hand_poses() {
        let config = GestureConfig::default();
        let curled = Vec3::new(0.0, 0.05, -0.03);

        let pinch = hand([Vec3::new(0.0, 0.1, -0.1), Vec3::new(0.01, 0.1, -0.1), curled, curled, curled]);
        assert_eq!(classify_hand(&pinch, &config), Some(GestureType::Pinch));

        let fist = hand([Vec3::new(0.05, 0.03, 0.0), Vec3::new(0.0, 0.06, -0.03), curled, curled, curled]);
        assert_eq!(classify_hand(&fist, &config), Some(GestureType::Grab));

        let point = hand([Vec3::new(0.05, 0.03, 0.0), Vec3::new(0.0, 0.0, -0.18), curled, curled, curled]);
        assert_eq!(classify_hand(&point, &config), Some(GestureType::Point));

        let open = Vec3::new(0.0, 0.0, -0.17);
        let palm = hand([Vec3::new(0.08, 0.0, -0.05), open, open, open, open]);
        assert_eq!(classify_hand(&palm, &config), None);
    }

    #[test]
    fn test_button_edges() {
        let mut state = SourceGestureState::default();
        assert_eq!(state.button_edges(&[true, false], 0.0).pressed, vec![0]);
        assert_eq!(state.button_edges(&[true, false], 10.0), ButtonEdges::default());

        let edges = state.button_edges(&[false, true], 600.0);
        assert_eq!(edges.pressed, vec![1]);
        assert_eq!(edges.released, vec![(0, 600.0)]);

        // A gamepad that stops reporting a button counts as a release
        let edges = state.button_edges(&[], 700.0);
        assert_eq!(edges.released, vec![(1, 100.0)]);
    }

    #[test]
    fn test_hand_pose_edge_fires_on_change() {
        let mut state = SourceGestureState::default();
        assert_eq!(state.hand_pose_edge(Some(GestureType::Pinch)), Some(GestureType::Pinch));
        assert_eq!(state.hand_pose_edge(Some(GestureType::Pinch)), None);
        assert_eq!(state.hand_pose_edge(None), None);
        assert_eq!(state.hand_pose_edge(Some(GestureType::Pinch)), Some(GestureType::Pinch));
    }
}
