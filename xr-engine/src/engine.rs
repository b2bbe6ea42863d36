//! Per-frame orchestration of the session, tracking, interaction and scene
//! services
//!
//! The host drives the engine from its platform frame callback. Within one
//! frame the order is always tracking, then interaction, then scene.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::anchors::{AnchorId, SpatialAnchor};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::gesture::Gesture;
use crate::input::{InputSource, ReferenceSpace, XrFrame};
use crate::interaction::{DispatchReport, InteractionContext, InteractionService};
use crate::math::Pose;
use crate::platform::{HapticActuator, XrPlatform};
use crate::scene::{Scene, SceneData, SceneFrameReport, SceneOptions, ScenePatch, SceneService};
use crate::session::{Session, SessionConfig, SessionManager, SessionState};
use crate::tracking::{SpatialTrackingService, TrackedPose, TrackingSource};

/// Everything one frame produced, for the renderer
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
    pub time: f64,
    /// `false` when the tracking rate limiter dropped the frame.
    pub tracked: bool,
    pub poses: Vec<TrackedPose>,
    #[serde(skip)]
    pub dispatches: Vec<DispatchReport>,
    pub scene: Option<SceneFrameReport>,
}

pub struct XrEngine {
    config: EngineConfig,
    events: EventBus,
    session: SessionManager,
    tracking: SpatialTrackingService,
    interaction: InteractionService,
    scenes: SceneService,
}

impl XrEngine {
    pub fn new(config: EngineConfig, platform: Arc<dyn XrPlatform>) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let session = SessionManager::new(platform, events.clone());
        let tracking = SpatialTrackingService::new(config.tracking.clone(), events.clone());
        let scenes = SceneService::new(config.scene, session.handle(), events.clone());
        let interaction = InteractionService::new(
            config.interaction.clone(),
            session.handle(),
            scenes.directory(),
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            session,
            tracking,
            interaction,
            scenes,
        })
    }

    pub fn with_haptics(mut self, haptics: Arc<dyn HapticActuator>) -> Self {
        self.interaction = self.interaction.with_haptics(haptics);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.session()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn tracking(&self) -> &SpatialTrackingService {
        &self.tracking
    }

    pub fn interaction(&self) -> &InteractionService {
        &self.interaction
    }

    pub fn interaction_mut(&mut self) -> &mut InteractionService {
        &mut self.interaction
    }

    pub fn scenes(&self) -> &SceneService {
        &self.scenes
    }

    /// Start a session with `config`, or the configured defaults, and begin
    /// tracking in its reference space.
    pub async fn start_session(&mut self, config: Option<SessionConfig>) -> Result<Session> {
        let config = config.unwrap_or_else(|| self.config.session.clone());
        match self.session.start_session(&config).await {
            Ok(session) => {
                self.tracking
                    .start_tracking(&self.session.handle(), ReferenceSpace::new(session.reference_space));
                Ok(session)
            }
            Err(e) => {
                // Every failed start leaves no live session behind
                self.tracking.stop_tracking();
                Err(e)
            }
        }
    }

    pub async fn end_session(&mut self) {
        self.session.end_session().await;
        self.tracking.stop_tracking();
    }

    /// Forward a device-initiated end, e.g. the headset was taken off.
    pub fn handle_platform_end(&mut self) {
        self.session.handle_platform_end();
        self.tracking.stop_tracking();
    }

    pub fn pause(&mut self) -> bool {
        self.session.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.session.resume()
    }

    /// Run one frame through the pipeline. `None` while no session is active.
    pub fn on_frame(&mut self, frame: &XrFrame) -> Option<FrameOutput> {
        if !self.session.is_active() {
            return None;
        }

        let space = self.tracking.reference_space().unwrap_or_default();
        let tracked = self.tracking.update_frame(frame, &space);
        let dispatches = self.interaction.update_frame(frame);
        let scene = self.scenes.update_frame(frame, frame.time);

        Some(FrameOutput {
            time: frame.time,
            tracked,
            poses: self.tracking.tracked_poses(),
            dispatches,
            scene,
        })
    }

    /// Entry point for gestures recognized outside the engine.
    pub fn process_gesture(&mut self, gesture: Gesture, source: Option<&InputSource>) -> Option<DispatchReport> {
        self.interaction.process_gesture(gesture, source)
    }

    pub fn register_handler<F>(&mut self, key: &str, handler: F)
    where
        F: FnMut(&InteractionContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.interaction.register_handler(key, handler);
    }

    pub fn create_scene(&mut self, data: SceneData, options: Option<SceneOptions>) -> Result<&Scene> {
        self.scenes.create_scene(data, options)
    }

    pub fn create_scene_from_json(&mut self, value: serde_json::Value, options: Option<SceneOptions>) -> Result<&Scene> {
        self.scenes.create_scene_from_json(value, options)
    }

    /// Apply `patch`; a scene with registered interactions has them rebuilt.
    pub fn update_scene(&mut self, id: &str, patch: ScenePatch) -> Result<&Scene> {
        let scene = self.scenes.update_scene(id, patch)?;
        if self.interaction.has_scene(id) {
            let count = self.interaction.setup_scene_interactions(scene);
            debug!(scene = %id, interactions = count, "interactions rebuilt after update");
        }
        Ok(scene)
    }

    pub fn delete_scene(&mut self, id: &str) -> Option<Scene> {
        let removed = self.scenes.delete_scene(id)?;
        self.interaction.remove_scene_interactions(id);
        Some(removed)
    }

    /// Make `id` the active scene and register its declared interactions.
    pub fn activate_scene(&mut self, id: &str) -> Result<&Scene> {
        let scene = self.scenes.activate_scene(id)?;
        let count = self.interaction.setup_scene_interactions(scene);
        info!(scene = %id, interactions = count, "scene live");
        Ok(scene)
    }

    pub fn add_spatial_anchor(&mut self, pose: Pose, label: Option<String>, lifetime_ms: Option<f64>) -> SpatialAnchor {
        self.tracking.add_spatial_anchor(pose, label, lifetime_ms)
    }

    pub fn remove_spatial_anchor(&mut self, id: AnchorId) {
        self.tracking.remove_spatial_anchor(id);
    }

    pub fn spatial_anchors(&self) -> Vec<SpatialAnchor> {
        self.tracking.spatial_anchors()
    }

    pub fn current_spatial_data(&self, source: TrackingSource) -> Result<TrackedPose> {
        self.tracking.current_spatial_data(source)
    }
}
