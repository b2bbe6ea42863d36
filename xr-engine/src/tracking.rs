//! Rate-limited pose extraction for every tracked source, plus anchor expiry

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::anchors::{AnchorId, AnchorStore, AnchorTrackingState, SpatialAnchor, DEFAULT_ANCHOR_LIFETIME_MS};
use crate::error::{Result, XrError};
use crate::events::{EventBus, XrEvent};
use crate::input::{Hand, HandJoint, InputSource, ReferenceSpace, XrFrame};
use crate::math::{Pose, Quat, Vec3};
use crate::session::{SessionFeature, SessionHandle, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingSource {
    Head,
    LeftHand,
    RightHand,
    LeftController,
    RightController,
    Eye,
}

impl TrackingSource {
    pub const COUNT: usize = 6;

    pub const ALL: [TrackingSource; TrackingSource::COUNT] = [
        TrackingSource::Head,
        TrackingSource::LeftHand,
        TrackingSource::RightHand,
        TrackingSource::LeftController,
        TrackingSource::RightController,
        TrackingSource::Eye,
    ];

    pub fn hand(hand: Hand) -> Self {
        match hand {
            Hand::Left => TrackingSource::LeftHand,
            Hand::Right => TrackingSource::RightHand,
        }
    }

    pub fn controller(hand: Hand) -> Self {
        match hand {
            Hand::Left => TrackingSource::LeftController,
            Hand::Right => TrackingSource::RightController,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TrackingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackingSource::Head => "head",
            TrackingSource::LeftHand => "left-hand",
            TrackingSource::RightHand => "right-hand",
            TrackingSource::LeftController => "left-controller",
            TrackingSource::RightController => "right-controller",
            TrackingSource::Eye => "eye",
        })
    }
}

/// Immutable pose snapshot; a new one replaces the old every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPose {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    pub timestamp: f64,
    pub confidence: f32,
    pub source: TrackingSource,
}

impl TrackedPose {
    pub fn new(source: TrackingSource, pose: Pose, timestamp: f64, confidence: f32) -> Self {
        Self {
            position: pose.position,
            rotation: pose.orientation,
            velocity: None,
            angular_velocity: None,
            timestamp,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    /// Stored poses are never filtered; consumers use this to discard weak ones.
    pub fn is_reliable(&self, floor: f32) -> bool {
        self.confidence >= floor
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum spacing between accepted frames (16ms targets 60Hz).
    pub min_frame_interval_ms: f64,
    pub eye_tracking_enabled: bool,
    pub head_confidence: f32,
    pub hand_confidence: f32,
    pub controller_confidence: f32,
    /// Eye tracking is noisier than head tracking.
    pub eye_confidence: f32,
    /// Advisory floor for consumers, see [`TrackedPose::is_reliable`].
    pub min_confidence: f32,
    pub default_anchor_lifetime_ms: f64,
    /// Fill missing velocities from consecutive poses of the same source.
    pub derive_velocity: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_frame_interval_ms: 16.0,
            eye_tracking_enabled: false,
            head_confidence: 1.0,
            hand_confidence: 0.95,
            controller_confidence: 1.0,
            eye_confidence: 0.8,
            min_confidence: 0.0,
            default_anchor_lifetime_ms: DEFAULT_ANCHOR_LIFETIME_MS,
            derive_velocity: true,
        }
    }
}

struct TrackingBinding {
    session: SessionHandle,
    generation: u64,
    reference_space: ReferenceSpace,
}

pub struct SpatialTrackingService {
    config: TrackingConfig,
    binding: Option<TrackingBinding>,
    poses: [Option<TrackedPose>; TrackingSource::COUNT],
    anchors: AnchorStore,
    last_accepted: Option<f64>,
    /// Latest frame time seen while active, dropped frames included.
    last_observed: Option<f64>,
    events: EventBus,
}

impl SpatialTrackingService {
    pub fn new(config: TrackingConfig, events: EventBus) -> Self {
        Self {
            config,
            binding: None,
            poses: [None; TrackingSource::COUNT],
            anchors: AnchorStore::new(),
            last_accepted: None,
            last_observed: None,
            events,
        }
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn is_tracking(&self) -> bool {
        self.binding.is_some()
    }

    pub fn reference_space(&self) -> Option<ReferenceSpace> {
        self.binding.as_ref().map(|b| b.reference_space)
    }

    /// Bind to the current session. A later session end stops tracking.
    pub fn start_tracking(&mut self, session: &SessionHandle, reference_space: ReferenceSpace) {
        if self.binding.is_some() {
            self.stop_tracking();
        }
        let generation = session.generation();
        info!(generation, space = ?reference_space.kind, "tracking started");
        self.binding = Some(TrackingBinding {
            session: session.clone(),
            generation,
            reference_space,
        });
    }

    /// Clear every pose and anchor and unbind from the session.
    pub fn stop_tracking(&mut self) {
        if self.binding.take().is_none() {
            return;
        }
        self.poses = [None; TrackingSource::COUNT];
        let dropped = self.anchors.len();
        self.anchors.clear();
        self.last_accepted = None;
        self.last_observed = None;
        info!(dropped_anchors = dropped, "tracking stopped");
    }

    /// Returns `true` when the frame passed the rate limiter and was processed.
    pub fn update_frame(&mut self, frame: &XrFrame, reference_space: &ReferenceSpace) -> bool {
        let Some(binding) = &self.binding else {
            return false;
        };
        let status = binding.session.status();
        let session_replaced = binding.session.generation() != binding.generation;
        if session_replaced || matches!(status, SessionStatus::Ended | SessionStatus::Idle | SessionStatus::Error) {
            debug!("bound session is gone, stopping tracking");
            self.stop_tracking();
            return false;
        }
        if status != SessionStatus::Active {
            return false;
        }

        if self.last_observed.replace(frame.time).is_none() {
            self.anchors.stamp_pending(frame.time);
        }
        if let Some(last) = self.last_accepted {
            if frame.time - last < self.config.min_frame_interval_ms {
                trace!(time = frame.time, last, "frame dropped by rate limiter");
                return false;
            }
        }
        self.last_accepted = Some(frame.time);

        self.track_head(frame, reference_space);
        for source in &frame.input_sources {
            self.track_hand(frame.time, source, reference_space);
            self.track_controller(frame.time, source, reference_space);
        }
        if self.config.eye_tracking_enabled {
            self.track_eye(frame, reference_space);
        }
        self.sweep_anchors(frame.time);
        true
    }

    fn track_head(&mut self, frame: &XrFrame, space: &ReferenceSpace) {
        let Some(view) = frame.primary_view() else {
            return;
        };
        let pose = TrackedPose::new(
            TrackingSource::Head,
            space.localize(view.transform),
            frame.time,
            self.config.head_confidence,
        );
        let pose = self.store(pose, None, None);
        self.events.emit(XrEvent::HeadTracked(pose));
    }

    fn track_hand(&mut self, time: f64, source: &InputSource, space: &ReferenceSpace) {
        let (Some(hand), Some(skeleton)) = (source.handedness, source.hand.as_ref()) else {
            return;
        };
        let Some(wrist) = skeleton.get(HandJoint::Wrist).or(source.grip) else {
            trace!(source = source.id, "hand without wrist or grip pose");
            return;
        };
        let pose = TrackedPose::new(
            TrackingSource::hand(hand),
            space.localize(wrist),
            time,
            self.config.hand_confidence,
        );
        let pose = self.store(pose, source.linear_velocity, source.angular_velocity);
        self.events.emit(XrEvent::HandTracked(pose));
    }

    fn track_controller(&mut self, time: f64, source: &InputSource, space: &ReferenceSpace) {
        let (Some(hand), Some(ray)) = (source.handedness, source.target_ray) else {
            return;
        };
        let pose = TrackedPose::new(
            TrackingSource::controller(hand),
            space.localize(ray),
            time,
            self.config.controller_confidence,
        );
        let pose = self.store(pose, source.linear_velocity, source.angular_velocity);
        self.events.emit(XrEvent::ControllerTracked(pose));
    }

    fn track_eye(&mut self, frame: &XrFrame, space: &ReferenceSpace) {
        let gaze = match frame.gaze {
            Some(gaze) => space.localize(gaze),
            None => match self.poses[TrackingSource::Head.index()] {
                // Head pose of this frame, already localized
                Some(head) if head.timestamp == frame.time => head.pose(),
                _ => return,
            },
        };
        let pose = TrackedPose::new(TrackingSource::Eye, gaze, frame.time, self.config.eye_confidence);
        let pose = self.store(pose, None, None);
        self.events.emit(XrEvent::EyeTracked(pose));
    }

    /// Replace the stored pose, filling in velocities when asked to.
    fn store(&mut self, mut pose: TrackedPose, velocity: Option<Vec3>, angular_velocity: Option<Vec3>) -> TrackedPose {
        let slot = &mut self.poses[pose.source.index()];
        pose.velocity = velocity;
        pose.angular_velocity = angular_velocity;

        if self.config.derive_velocity {
            if let Some(previous) = slot {
                let dt = ((pose.timestamp - previous.timestamp) / 1000.0) as f32;
                if dt > 0.0 {
                    pose.velocity.get_or_insert((pose.position - previous.position) / dt);
                    pose.angular_velocity.get_or_insert_with(|| {
                        let delta = pose.rotation * previous.rotation.conjugate();
                        let (axis, angle) = delta.to_axis_angle();
                        axis * (angle / dt)
                    });
                }
            }
        }

        *slot = Some(pose);
        pose
    }

    fn sweep_anchors(&mut self, now: f64) {
        for id in self.anchors.evict_expired(now) {
            debug!(%id, "spatial anchor expired");
            self.events.emit(XrEvent::SpatialAnchorRemoved { id, expired: true });
        }
    }

    /// Time of the latest frame seen, which anchors use as their clock.
    /// `None` before the first frame.
    pub fn clock(&self) -> Option<f64> {
        self.last_observed
    }

    pub fn add_spatial_anchor(&mut self, pose: Pose, label: Option<String>, lifetime_ms: Option<f64>) -> SpatialAnchor {
        let tracking_state = match &self.binding {
            Some(binding) if binding.session.has_feature(SessionFeature::Anchors) => AnchorTrackingState::Tracked,
            Some(_) => AnchorTrackingState::Emulated,
            None => AnchorTrackingState::Untracked,
        };

        let anchor = SpatialAnchor {
            id: self.anchors.next_id(),
            position: pose.position,
            rotation: pose.orientation,
            label,
            created_at: self.clock(),
            lifetime_ms: lifetime_ms.unwrap_or(self.config.default_anchor_lifetime_ms),
            tracking_state,
        };
        debug!(id = %anchor.id, label = ?anchor.label, lifetime_ms = anchor.lifetime_ms, "spatial anchor created");
        self.anchors.insert(anchor.clone());
        self.events.emit(XrEvent::SpatialAnchorCreated(anchor.clone()));
        anchor
    }

    pub fn remove_spatial_anchor(&mut self, id: AnchorId) {
        if self.anchors.remove(id).is_some() {
            self.events.emit(XrEvent::SpatialAnchorRemoved { id, expired: false });
        }
    }

    pub fn spatial_anchors(&self) -> Vec<SpatialAnchor> {
        self.anchors.iter().cloned().collect()
    }

    pub fn spatial_anchor(&self, id: AnchorId) -> Option<&SpatialAnchor> {
        self.anchors.get(id)
    }

    pub fn current_spatial_data(&self, source: TrackingSource) -> Result<TrackedPose> {
        self.poses[source.index()].ok_or(XrError::NoTrackingData(source))
    }

    /// All poses recorded so far, in [`TrackingSource::ALL`] order.
    pub fn tracked_poses(&self) -> Vec<TrackedPose> {
        self.poses.iter().flatten().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::HandSkeleton;
    use crate::platform::{DeviceProfile, SimulatedPlatform};
    use crate::session::{SessionConfig, SessionManager};
    use std::sync::Arc;

    async fn active_session() -> SessionManager {
        let platform = Arc::new(SimulatedPlatform::new(DeviceProfile::HeadMountedDisplay));
        let mut manager = SessionManager::new(platform, EventBus::new());
        manager.start_session(&SessionConfig::default()).await.unwrap();
        manager
    }

    fn head_frame(time: f64) -> XrFrame {
        XrFrame::new(time).with_head(Pose::at(Vec3::new(0.0, 1.6, 0.0)))
    }

    #[tokio::test]
    async fn test_rate_limiter_accepts_spaced_frames() {
        let manager = active_session().await;
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);

        assert!(tracking.update_frame(&head_frame(0.0), &space));
        assert!(!tracking.update_frame(&head_frame(5.0), &space));
        assert!(tracking.update_frame(&head_frame(20.0), &space));
        assert_eq!(tracking.current_spatial_data(TrackingSource::Head).unwrap().timestamp, 20.0);
    }

    #[test]
    fn test_update_without_session_is_noop() {
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        assert!(!tracking.update_frame(&head_frame(0.0), &space));

        // Bound to a handle that never became active
        tracking.start_tracking(&SessionHandle::default(), space);
        assert!(!tracking.update_frame(&head_frame(0.0), &space));
        assert!(matches!(
            tracking.current_spatial_data(TrackingSource::Head),
            Err(XrError::NoTrackingData(TrackingSource::Head))
        ));
    }

    #[tokio::test]
    async fn test_hand_and_controller_extraction() {
        let manager = active_session().await;
        let events = EventBus::new();
        let recorder = events.recorder();
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), events);
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);

        let skeleton = HandSkeleton::new().with_joint(HandJoint::Wrist, Pose::at(Vec3::new(-0.2, 1.1, -0.3)));
        let frame = head_frame(0.0)
            .with_input(InputSource::tracked_hand(1, Hand::Left, skeleton))
            .with_input(InputSource::controller(2, Hand::Right, Pose::at(Vec3::new(0.3, 1.2, -0.4))));
        assert!(tracking.update_frame(&frame, &space));

        let left = tracking.current_spatial_data(TrackingSource::LeftHand).unwrap();
        assert_eq!(left.position, Vec3::new(-0.2, 1.1, -0.3));
        assert_eq!(left.confidence, 0.95);
        assert!(tracking.current_spatial_data(TrackingSource::RightController).is_ok());
        assert!(tracking.current_spatial_data(TrackingSource::RightHand).is_err());
        assert_eq!(recorder.names(), vec!["tracking:head", "tracking:hand", "tracking:controller"]);
    }

    #[tokio::test]
    async fn test_eye_pose_derived_from_head() {
        let manager = active_session().await;
        let config = TrackingConfig {
            eye_tracking_enabled: true,
            ..TrackingConfig::default()
        };
        let mut tracking = SpatialTrackingService::new(config, EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);
        tracking.update_frame(&head_frame(0.0), &space);

        let eye = tracking.current_spatial_data(TrackingSource::Eye).unwrap();
        let head = tracking.current_spatial_data(TrackingSource::Head).unwrap();
        assert_eq!(eye.position, head.position);
        assert_eq!(eye.confidence, 0.8);
        assert!(eye.confidence < head.confidence);
    }

    #[tokio::test]
    async fn test_velocity_derived_between_frames() {
        let manager = active_session().await;
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);

        tracking.update_frame(&XrFrame::new(0.0).with_head(Pose::at(Vec3::ZERO)), &space);
        tracking.update_frame(&XrFrame::new(100.0).with_head(Pose::at(Vec3::new(0.1, 0.0, 0.0))), &space);

        let head = tracking.current_spatial_data(TrackingSource::Head).unwrap();
        let velocity = head.velocity.unwrap();
        assert!((velocity.x - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_anchor_expiry_on_next_frame() {
        let manager = active_session().await;
        let events = EventBus::new();
        let recorder = events.recorder();
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), events);
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);
        tracking.update_frame(&head_frame(0.0), &space);

        let short = tracking.add_spatial_anchor(Pose::default(), Some("marker".to_string()), Some(100.0));
        let long = tracking.add_spatial_anchor(Pose::default(), None, None);
        assert_eq!(short.tracking_state, AnchorTrackingState::Tracked);
        assert_eq!(long.lifetime_ms, DEFAULT_ANCHOR_LIFETIME_MS);

        tracking.update_frame(&head_frame(150.0), &space);
        let ids: Vec<AnchorId> = tracking.spatial_anchors().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![long.id]);
        assert!(recorder.events().contains(&XrEvent::SpatialAnchorRemoved { id: short.id, expired: true }));
    }

    #[tokio::test]
    async fn test_anchor_before_first_frame_uses_host_clock() {
        let manager = active_session().await;
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);

        let anchor = tracking.add_spatial_anchor(Pose::default(), None, None);
        assert_eq!(anchor.created_at, None);

        assert!(tracking.update_frame(&head_frame(1.7e12), &space));
        let stored = tracking.spatial_anchor(anchor.id).unwrap();
        assert_eq!(stored.created_at, Some(1.7e12));
        assert_eq!(tracking.spatial_anchors().len(), 1);
    }

    #[tokio::test]
    async fn test_anchor_clock_follows_dropped_frames() {
        let manager = active_session().await;
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);

        assert!(tracking.update_frame(&head_frame(0.0), &space));
        for time in [5.0, 10.0, 15.0] {
            assert!(!tracking.update_frame(&head_frame(time), &space));
        }
        let anchor = tracking.add_spatial_anchor(Pose::default(), None, Some(10.0));
        assert_eq!(anchor.created_at, Some(15.0));

        // Age 5ms at the next accepted frame
        assert!(tracking.update_frame(&head_frame(20.0), &space));
        assert!(tracking.spatial_anchor(anchor.id).is_some());
        assert!(tracking.update_frame(&head_frame(40.0), &space));
        assert!(tracking.spatial_anchor(anchor.id).is_none());
    }

    #[tokio::test]
    async fn test_session_end_auto_stops() {
        let mut manager = active_session().await;
        let mut tracking = SpatialTrackingService::new(TrackingConfig::default(), EventBus::new());
        let space = ReferenceSpace::default();
        tracking.start_tracking(&manager.handle(), space);
        tracking.update_frame(&head_frame(0.0), &space);
        tracking.add_spatial_anchor(Pose::default(), None, None);

        manager.handle_platform_end();
        assert!(!tracking.update_frame(&head_frame(50.0), &space));
        assert!(!tracking.is_tracking());
        assert!(tracking.spatial_anchors().is_empty());
        assert!(tracking.current_spatial_data(TrackingSource::Head).is_err());
    }
}
