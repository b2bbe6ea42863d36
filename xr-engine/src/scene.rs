//! Scene graph registry and per-frame component updates
//!
//! Scenes are declared as data (`SceneData`, usually from JSON), validated as a
//! whole and then committed. Only the active scene is ticked, and only while
//! the session is active. Physics and audio components are opaque payloads that
//! the service forwards to the host untouched.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, XrError};
use crate::events::{EventBus, XrEvent};
use crate::gesture::GestureType;
use crate::input::{Hand, XrFrame};
use crate::math::{Pose, Quat, Transform, Vec3};
use crate::metrics::{FrameMetrics, PerformanceMetrics, SAMPLE_COUNT};
use crate::session::SessionHandle;

fn default_true() -> bool {
    true
}

fn default_speed() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Mesh,
    Light,
    Camera,
    Audio,
    Anchor,
    Interaction,
    Particle,
}

/// Linear and angular velocity integrated into the object's transform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformComponent {
    pub linear_velocity: Vec3,
    /// Axis scaled by radians per second.
    pub angular_velocity: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationComponent {
    pub clip: String,
    pub duration_s: f32,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_true")]
    pub looping: bool,
    #[serde(default)]
    pub time_s: f32,
    #[serde(default = "default_true")]
    pub playing: bool,
}

impl AnimationComponent {
    fn advance(&mut self, dt: f32) {
        if !self.playing || self.duration_s <= 0.0 {
            return;
        }
        let t = self.time_s + dt * self.speed;
        if self.looping {
            self.time_s = t.rem_euclid(self.duration_s);
        } else if t >= self.duration_s {
            self.time_s = self.duration_s;
            self.playing = false;
        } else {
            self.time_s = t.max(0.0);
        }
    }
}

/// Payload owned by an external system
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpaqueComponent {
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One declared interaction on a scene object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub gesture: GestureType,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handedness: Option<Hand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl InteractionSpec {
    pub fn new(gesture: GestureType, handler: &str) -> Self {
        Self {
            id: None,
            gesture,
            handler: handler.to_string(),
            handedness: None,
            min_confidence: None,
            priority: 0,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteractionComponent {
    #[serde(default)]
    pub interactions: Vec<InteractionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentKind {
    Transform(TransformComponent),
    Animation(AnimationComponent),
    Physics(OpaqueComponent),
    Audio(OpaqueComponent),
    Interaction(InteractionComponent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ComponentKind,
}

impl Component {
    pub fn new(kind: ComponentKind) -> Self {
        Self { enabled: true, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub transform: Transform,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub interactive: bool,
}

impl SceneObject {
    pub fn new(id: &str, object_type: ObjectType, transform: Transform) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            object_type,
            transform,
            components: Vec::new(),
            visible: true,
            interactive: false,
        }
    }

    pub fn with_component(mut self, kind: ComponentKind) -> Self {
        self.components.push(Component::new(kind));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsSettings {
    pub enabled: bool,
    pub gravity: Vec3,
    pub time_step_s: f32,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            gravity: Vec3::new(0.0, -9.81, 0.0),
            time_step_s: 1.0 / 90.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
    pub environment: Option<String>,
    pub shadows: bool,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            ambient_color: Vec3::ONE,
            ambient_intensity: 0.3,
            environment: None,
            shadows: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub master_volume: f32,
    pub spatial: bool,
    pub reverb: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            spatial: true,
            reverb: None,
        }
    }
}

/// Declarative scene description accepted by `create_scene`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneData {
    pub id: String,
    pub name: String,
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub physics: PhysicsSettings,
    #[serde(default)]
    pub lighting: LightingSettings,
    #[serde(default)]
    pub audio: AudioSettings,
}

impl SceneData {
    pub fn new(id: &str, name: &str, objects: Vec<SceneObject>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            objects,
            physics: PhysicsSettings::default(),
            lighting: LightingSettings::default(),
            audio: AudioSettings::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(XrError::InvalidSceneData("scene id is empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(XrError::InvalidSceneData(format!("scene '{}' has no name", self.id)));
        }
        validate_objects(&self.id, &self.objects)
    }
}

fn validate_objects(scene_id: &str, objects: &[SceneObject]) -> Result<()> {
    let mut seen = HashSet::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        if object.id.trim().is_empty() {
            return Err(XrError::InvalidSceneData(format!(
                "object #{} in scene '{}' has no id",
                index, scene_id
            )));
        }
        if object.name.trim().is_empty() {
            return Err(XrError::InvalidSceneData(format!("object '{}' has no name", object.id)));
        }
        if !object.transform.is_fully_specified() {
            return Err(XrError::InvalidSceneData(format!(
                "object '{}' has an incomplete transform",
                object.id
            )));
        }
        if !seen.insert(object.id.as_str()) {
            return Err(XrError::InvalidSceneData(format!(
                "duplicate object id '{}' in scene '{}'",
                object.id, scene_id
            )));
        }
    }
    Ok(())
}

/// Results of the optional post-creation steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SceneRuntime {
    pub optimized: bool,
    pub physics_bodies: Option<usize>,
    pub light_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub objects: Vec<SceneObject>,
    pub physics: PhysicsSettings,
    pub lighting: LightingSettings,
    pub audio: AudioSettings,
    pub runtime: SceneRuntime,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scene {
    pub fn new(id: &str, name: &str, objects: Vec<SceneObject>) -> Self {
        Self::from_data(SceneData::new(id, name, objects))
    }

    fn from_data(data: SceneData) -> Self {
        let now = Utc::now();
        Self {
            id: data.id,
            name: data.name,
            objects: data.objects,
            physics: data.physics,
            lighting: data.lighting,
            audio: data.audio,
            runtime: SceneRuntime::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn object(&self, id: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    fn object_mut(&mut self, id: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    /// Normalize rotations and drop components that can never run.
    fn optimize(&mut self) {
        for object in &mut self.objects {
            let t = object.transform;
            object.transform = Transform::new(t.position, t.rotation.normalize(), t.scale);
            object.components.retain(|c| match &c.kind {
                ComponentKind::Interaction(i) => !i.interactions.is_empty(),
                ComponentKind::Animation(a) => a.duration_s > 0.0,
                _ => true,
            });
        }
        self.runtime.optimized = true;
    }

    fn init_physics(&mut self) {
        let bodies = self
            .objects
            .iter()
            .filter(|o| o.components.iter().any(|c| matches!(c.kind, ComponentKind::Physics(_))))
            .count();
        self.runtime.physics_bodies = Some(bodies);
    }

    fn setup_lighting(&mut self) {
        let lights = self.objects.iter().filter(|o| o.object_type == ObjectType::Light).count();
        if lights == 0 && self.lighting.ambient_intensity <= 0.0 {
            // Keep unlit scenes visible
            self.lighting.ambient_intensity = LightingSettings::default().ambient_intensity;
        }
        self.runtime.light_count = Some(lights);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneOptions {
    pub auto_optimize: bool,
    pub enable_physics: bool,
    pub enable_lighting: bool,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            auto_optimize: true,
            enable_physics: true,
            enable_lighting: true,
        }
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenePatch {
    pub name: Option<String>,
    pub physics: Option<PhysicsSettings>,
    pub lighting: Option<LightingSettings>,
    pub audio: Option<AudioSettings>,
    /// Replaces objects with the same id whole, appends the rest.
    pub upsert_objects: Vec<SceneObject>,
    pub remove_objects: Vec<String>,
}

impl ScenePatch {
    pub fn upsert(mut self, object: SceneObject) -> Self {
        self.upsert_objects.push(object);
        self
    }

    pub fn remove(mut self, id: &str) -> Self {
        self.remove_objects.push(id.to_string());
        self
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    active: Option<String>,
    objects: HashMap<String, HashSet<String>>,
}

/// Shared read view of the registry: which scene is active and which object
/// ids each registered scene holds right now
#[derive(Debug, Clone, Default)]
pub struct SceneDirectory {
    inner: Arc<RwLock<DirectoryState>>,
}

impl SceneDirectory {
    pub fn active(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).active.clone()
    }

    pub fn is_active(&self, scene_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .as_deref()
            == Some(scene_id)
    }

    /// `false` for unknown scenes as well as unknown objects.
    pub fn contains_object(&self, scene_id: &str, object_id: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .get(scene_id)
            .map_or(false, |ids| ids.contains(object_id))
    }

    pub(crate) fn set_active(&self, scene_id: Option<String>) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).active = scene_id;
    }

    pub(crate) fn publish(&self, scene: &Scene) {
        let ids = scene.objects.iter().map(|o| o.id.clone()).collect();
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .objects
            .insert(scene.id.clone(), ids);
    }

    pub(crate) fn forget(&self, scene_id: &str) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state.objects.remove(scene_id);
        if state.active.as_deref() == Some(scene_id) {
            state.active = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub target_frame_rate: f64,
    pub metrics_window: usize,
    pub default_options: SceneOptions,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            target_frame_rate: 90.0,
            metrics_window: SAMPLE_COUNT,
            default_options: SceneOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationState {
    pub object_id: String,
    pub clip: String,
    pub time_s: f32,
    pub playing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedPayload {
    pub object_id: String,
    pub payload: serde_json::Value,
}

/// What the renderer and external systems consume after a scene tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneFrameReport {
    pub scene_id: String,
    pub time: f64,
    pub delta_ms: f64,
    /// Objects whose transform was replaced this frame, with the new value.
    pub transforms: Vec<(String, Transform)>,
    pub animations: Vec<AnimationState>,
    pub physics: Vec<ForwardedPayload>,
    pub audio: Vec<ForwardedPayload>,
    pub interactive_objects: Vec<String>,
    /// Head pose for spatial audio.
    pub listener: Option<Pose>,
    pub metrics: PerformanceMetrics,
}

pub struct SceneService {
    config: SceneConfig,
    scenes: HashMap<String, Scene>,
    directory: SceneDirectory,
    session: SessionHandle,
    metrics: FrameMetrics,
    /// Session activation the frame baseline belongs to.
    activation: u64,
    events: EventBus,
}

impl SceneService {
    pub fn new(config: SceneConfig, session: SessionHandle, events: EventBus) -> Self {
        let metrics = FrameMetrics::new(config.target_frame_rate, config.metrics_window);
        Self {
            config,
            scenes: HashMap::new(),
            directory: SceneDirectory::default(),
            session,
            metrics,
            activation: 0,
            events,
        }
    }

    pub fn directory(&self) -> SceneDirectory {
        self.directory.clone()
    }

    pub fn active_scene_id(&self) -> Option<String> {
        self.directory.active()
    }

    pub fn active_scene(&self) -> Option<&Scene> {
        self.directory.active().and_then(|id| self.scenes.get(&id))
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(id)
    }

    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    /// Validate and register a scene. Nothing is stored on failure.
    pub fn create_scene(&mut self, data: SceneData, options: Option<SceneOptions>) -> Result<&Scene> {
        data.validate()?;
        if self.scenes.contains_key(&data.id) {
            return Err(XrError::InvalidSceneData(format!("scene '{}' already exists", data.id)));
        }

        let options = options.unwrap_or(self.config.default_options);
        let mut scene = Scene::from_data(data);
        if options.auto_optimize {
            scene.optimize();
        }
        if options.enable_physics && scene.physics.enabled {
            scene.init_physics();
        }
        if options.enable_lighting {
            scene.setup_lighting();
        }

        info!(scene = %scene.id, objects = scene.objects.len(), ?options, "scene created");
        self.directory.publish(&scene);
        let id = scene.id.clone();
        Ok(self.scenes.entry(id).or_insert(scene))
    }

    pub fn create_scene_from_json(
        &mut self,
        value: serde_json::Value,
        options: Option<SceneOptions>,
    ) -> Result<&Scene> {
        let data: SceneData =
            serde_json::from_value(value).map_err(|e| XrError::InvalidSceneData(e.to_string()))?;
        self.create_scene(data, options)
    }

    pub fn create_scene_from_file(&mut self, path: impl AsRef<Path>, options: Option<SceneOptions>) -> Result<&Scene> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| XrError::InvalidSceneData(format!("{}: {}", path.display(), e)))?;
        let data: SceneData =
            serde_json::from_str(&text).map_err(|e| XrError::InvalidSceneData(format!("{}: {}", path.display(), e)))?;
        self.create_scene(data, options)
    }

    /// Apply `patch` to a copy, validate it, then commit.
    pub fn update_scene(&mut self, id: &str, patch: ScenePatch) -> Result<&Scene> {
        let current = self
            .scenes
            .get(id)
            .ok_or_else(|| XrError::SceneNotFound(id.to_string()))?;

        let mut next = current.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(physics) = patch.physics {
            next.physics = physics;
        }
        if let Some(lighting) = patch.lighting {
            next.lighting = lighting;
        }
        if let Some(audio) = patch.audio {
            next.audio = audio;
        }
        next.objects.retain(|o| !patch.remove_objects.contains(&o.id));
        for object in patch.upsert_objects {
            match next.object_mut(&object.id) {
                Some(existing) => *existing = object,
                None => next.objects.push(object),
            }
        }

        if next.name.trim().is_empty() {
            return Err(XrError::InvalidSceneData(format!("scene '{}' has no name", id)));
        }
        validate_objects(id, &next.objects)?;

        next.updated_at = Utc::now();
        debug!(scene = %id, objects = next.objects.len(), "scene updated");
        let slot = self
            .scenes
            .get_mut(id)
            .ok_or_else(|| XrError::SceneNotFound(id.to_string()))?;
        *slot = next;
        self.directory.publish(slot);
        Ok(slot)
    }

    /// Remove a scene. Deleting the active scene leaves no scene active.
    pub fn delete_scene(&mut self, id: &str) -> Option<Scene> {
        let removed = self.scenes.remove(id)?;
        let was_active = self.directory.is_active(id);
        self.directory.forget(id);
        if was_active {
            self.events.emit(XrEvent::SceneDeactivated { scene_id: id.to_string() });
        }
        info!(scene = %id, "scene deleted");
        Some(removed)
    }

    pub fn activate_scene(&mut self, id: &str) -> Result<&Scene> {
        let Some(scene) = self.scenes.get(id) else {
            warn!(scene = %id, "cannot activate unknown scene");
            return Err(XrError::SceneNotFound(id.to_string()));
        };

        let previous = self.directory.active();
        if previous.as_deref() != Some(id) {
            // A newly activated scene does not integrate over earlier frames
            self.metrics.rebase();
        }
        if let Some(previous) = previous.filter(|p| p != id) {
            self.events.emit(XrEvent::SceneDeactivated { scene_id: previous });
        }
        self.directory.set_active(Some(id.to_string()));
        info!(scene = %id, "scene activated");
        self.events.emit(XrEvent::SceneActivated { scene_id: id.to_string() });
        Ok(scene)
    }

    pub fn deactivate_scene(&mut self) -> Option<String> {
        let previous = self.directory.active()?;
        self.directory.set_active(None);
        self.events.emit(XrEvent::SceneDeactivated {
            scene_id: previous.clone(),
        });
        Some(previous)
    }

    /// Tick the active scene. Returns `None` when nothing ran.
    pub fn update_frame(&mut self, frame: &XrFrame, time: f64) -> Option<SceneFrameReport> {
        if !self.session.is_active() {
            return None;
        }
        let scene_id = self.directory.active()?;
        let Some(scene) = self.scenes.get_mut(&scene_id) else {
            warn!(scene = %scene_id, "active scene is missing from the registry");
            return None;
        };

        // Paused or restarted: the gap is not simulation time
        let activation = self.session.activation();
        if activation != self.activation {
            self.activation = activation;
            self.metrics.rebase();
        }

        let delta_ms = self.metrics.record(time).unwrap_or(0.0);
        let dt = (delta_ms / 1000.0) as f32;

        let mut report = SceneFrameReport {
            scene_id,
            time,
            delta_ms,
            transforms: Vec::new(),
            animations: Vec::new(),
            physics: Vec::new(),
            audio: Vec::new(),
            interactive_objects: Vec::new(),
            listener: frame.primary_view().map(|v| v.transform),
            metrics: self.metrics.snapshot(),
        };

        for object in scene.objects.iter_mut().filter(|o| o.visible) {
            apply_components(object, dt, &mut report);
        }

        trace!(scene = %report.scene_id, delta_ms, transforms = report.transforms.len(), "scene frame");
        Some(report)
    }
}

fn apply_components(object: &mut SceneObject, dt: f32, report: &mut SceneFrameReport) {
    for component in object.components.iter_mut().filter(|c| c.enabled) {
        match &mut component.kind {
            ComponentKind::Transform(motion) => {
                let next = integrate(object.transform, motion, dt);
                if next != object.transform {
                    object.transform = next;
                    report.transforms.push((object.id.clone(), next));
                }
            }
            ComponentKind::Animation(animation) => {
                animation.advance(dt);
                report.animations.push(AnimationState {
                    object_id: object.id.clone(),
                    clip: animation.clip.clone(),
                    time_s: animation.time_s,
                    playing: animation.playing,
                });
            }
            ComponentKind::Physics(opaque) => report.physics.push(ForwardedPayload {
                object_id: object.id.clone(),
                payload: opaque.payload.clone(),
            }),
            ComponentKind::Audio(opaque) => report.audio.push(ForwardedPayload {
                object_id: object.id.clone(),
                payload: opaque.payload.clone(),
            }),
            ComponentKind::Interaction(_) => {
                if object.interactive && !report.interactive_objects.contains(&object.id) {
                    report.interactive_objects.push(object.id.clone());
                }
            }
        }
    }
}

fn integrate(transform: Transform, motion: &TransformComponent, dt: f32) -> Transform {
    if dt <= 0.0 {
        return transform;
    }
    let position = transform.position + motion.linear_velocity * dt;
    let speed = motion.angular_velocity.length();
    let rotation = if speed > 1e-6 {
        (Quat::from_axis_angle(motion.angular_velocity.normalize(), speed * dt) * transform.rotation).normalize()
    } else {
        transform.rotation
    };
    Transform::new(position, rotation, transform.scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DeviceProfile, SimulatedPlatform};
    use crate::session::{SessionConfig, SessionManager};
    use serde_json::json;

    async fn active_session() -> SessionManager {
        let platform = Arc::new(SimulatedPlatform::new(DeviceProfile::HeadMountedDisplay));
        let mut manager = SessionManager::new(platform, EventBus::new());
        manager.start_session(&SessionConfig::default()).await.unwrap();
        manager
    }

    fn lab_json() -> serde_json::Value {
        json!({
            "id": "lab",
            "name": "Lab",
            "objects": [
                {
                    "id": "cube",
                    "name": "Cube",
                    "type": "mesh",
                    "transform": {
                        "position": { "x": 0.0, "y": 1.0, "z": -2.0 },
                        "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 },
                        "scale": { "x": 1.0, "y": 1.0, "z": 1.0 }
                    },
                    "interactive": true,
                    "components": [
                        { "type": "interaction", "interactions": [ { "gesture": "tap", "handler": "toggle" } ] },
                        { "type": "physics", "payload": { "mass": 2.5 } }
                    ]
                },
                {
                    "id": "lamp",
                    "name": "Lamp",
                    "type": "light",
                    "transform": {
                        "position": { "x": 1.0, "y": 2.0, "z": 0.0 },
                        "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 },
                        "scale": { "x": 1.0, "y": 1.0, "z": 1.0 }
                    }
                }
            ]
        })
    }

    #[test]
    fn test_create_from_json() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        let scene = scenes.create_scene_from_json(lab_json(), None).unwrap();
        assert_eq!(scene.objects.len(), 2);
        assert_eq!(scene.runtime.physics_bodies, Some(1));
        assert_eq!(scene.runtime.light_count, Some(1));
        assert!(scene.runtime.optimized);

        let cube = scene.object("cube").unwrap();
        assert!(cube.visible);
        assert!(matches!(
            &cube.components[1].kind,
            ComponentKind::Physics(OpaqueComponent { payload }) if payload["mass"] == 2.5
        ));
    }

    #[test]
    fn test_partial_transform_is_rejected() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        let mut value = lab_json();
        value["objects"][1]["transform"] = json!({ "position": { "x": 1.0, "y": 2.0, "z": 0.0 } });

        let err = scenes.create_scene_from_json(value, None).unwrap_err();
        assert!(matches!(err, XrError::InvalidSceneData(_)));
        assert!(scenes.is_empty());
    }

    #[test]
    fn test_validation_rejects_before_mutation() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());

        let nameless = SceneData::new("a", "", vec![]);
        assert!(matches!(scenes.create_scene(nameless, None), Err(XrError::InvalidSceneData(_))));

        let duplicate = SceneData::new(
            "b",
            "B",
            vec![
                SceneObject::new("x", ObjectType::Mesh, Transform::IDENTITY),
                SceneObject::new("x", ObjectType::Light, Transform::IDENTITY),
            ],
        );
        assert!(matches!(scenes.create_scene(duplicate, None), Err(XrError::InvalidSceneData(_))));

        let nan = SceneData::new(
            "c",
            "C",
            vec![SceneObject::new("x", ObjectType::Mesh, Transform::with_position(Vec3::new(f32::NAN, 0.0, 0.0)))],
        );
        assert!(matches!(scenes.create_scene(nan, None), Err(XrError::InvalidSceneData(_))));
        assert!(scenes.is_empty());
    }

    #[test]
    fn test_post_steps_are_optional() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        let options = SceneOptions {
            auto_optimize: false,
            enable_physics: false,
            enable_lighting: false,
        };
        let scene = scenes.create_scene_from_json(lab_json(), Some(options)).unwrap();
        assert_eq!(scene.runtime, SceneRuntime::default());
    }

    #[test]
    fn test_activate_unknown_scene() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        let err = scenes.activate_scene("missing").unwrap_err();
        assert!(matches!(err, XrError::SceneNotFound(id) if id == "missing"));
        assert!(scenes.active_scene_id().is_none());
    }

    #[test]
    fn test_delete_active_scene_clears_active() {
        let events = EventBus::new();
        let recorder = events.recorder();
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), events);
        scenes.create_scene(SceneData::new("a", "A", vec![]), None).unwrap();
        scenes.create_scene(SceneData::new("b", "B", vec![]), None).unwrap();
        scenes.activate_scene("a").unwrap();

        assert!(scenes.delete_scene("a").is_some());
        assert!(scenes.active_scene_id().is_none());
        assert_eq!(scenes.len(), 1);
        assert_eq!(recorder.count("sceneDeactivated"), 1);
        assert!(scenes.delete_scene("a").is_none());
    }

    #[test]
    fn test_invalid_update_leaves_scene_untouched() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        scenes.create_scene_from_json(lab_json(), None).unwrap();
        let before = scenes.scene("lab").unwrap().clone();

        let bad = ScenePatch::default()
            .upsert(SceneObject::new("lamp", ObjectType::Light, Transform::with_position(Vec3::new(0.0, f32::INFINITY, 0.0))));
        assert!(scenes.update_scene("lab", bad).is_err());
        assert_eq!(scenes.scene("lab"), Some(&before));

        assert!(matches!(
            scenes.update_scene("nope", ScenePatch::default()),
            Err(XrError::SceneNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_frame_requires_session_and_scene() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        scenes.create_scene(SceneData::new("a", "A", vec![]), None).unwrap();
        scenes.activate_scene("a").unwrap();
        assert!(scenes.update_frame(&XrFrame::new(0.0), 0.0).is_none());

        let manager = active_session().await;
        let mut scenes = SceneService::new(SceneConfig::default(), manager.handle(), EventBus::new());
        assert!(scenes.update_frame(&XrFrame::new(0.0), 0.0).is_none());
        scenes.create_scene(SceneData::new("a", "A", vec![]), None).unwrap();
        scenes.activate_scene("a").unwrap();
        assert!(scenes.update_frame(&XrFrame::new(0.0), 0.0).is_some());
    }

    #[tokio::test]
    async fn test_components_apply_in_order_and_skip_disabled() {
        let manager = active_session().await;
        let mut scenes = SceneService::new(SceneConfig::default(), manager.handle(), EventBus::new());

        let mut spinner = SceneObject::new("spinner", ObjectType::Mesh, Transform::IDENTITY)
            .with_component(ComponentKind::Transform(TransformComponent {
                linear_velocity: Vec3::new(1.0, 0.0, 0.0),
                angular_velocity: Vec3::ZERO,
            }))
            .with_component(ComponentKind::Audio(OpaqueComponent {
                payload: json!({ "clip": "hum.ogg" }),
            }))
            .with_component(ComponentKind::Animation(AnimationComponent {
                clip: "idle".to_string(),
                duration_s: 1.0,
                speed: 1.0,
                looping: true,
                time_s: 0.0,
                playing: true,
            }));
        spinner.components[1].enabled = false;
        let mut hidden = SceneObject::new("hidden", ObjectType::Mesh, Transform::IDENTITY).with_component(
            ComponentKind::Transform(TransformComponent {
                linear_velocity: Vec3::ONE,
                angular_velocity: Vec3::ZERO,
            }),
        );
        hidden.visible = false;

        scenes
            .create_scene(SceneData::new("a", "A", vec![spinner, hidden]), None)
            .unwrap();
        scenes.activate_scene("a").unwrap();

        assert!(scenes.update_frame(&XrFrame::new(0.0), 0.0).unwrap().transforms.is_empty());
        let report = scenes.update_frame(&XrFrame::new(500.0), 500.0).unwrap();
        assert_eq!(report.transforms.len(), 1);
        assert_eq!(report.transforms[0].0, "spinner");
        assert!((report.transforms[0].1.position.x - 0.5).abs() < 1e-6);
        assert!(report.audio.is_empty());
        assert_eq!(report.animations[0].time_s, 0.5);

        let hidden = scenes.scene("a").unwrap().object("hidden").unwrap();
        assert_eq!(hidden.transform, Transform::IDENTITY);
    }

    #[tokio::test]
    async fn test_dropped_frames_are_counted_not_skipped() {
        let manager = active_session().await;
        let mut scenes = SceneService::new(SceneConfig::default(), manager.handle(), EventBus::new());
        scenes.create_scene(SceneData::new("a", "A", vec![]), None).unwrap();
        scenes.activate_scene("a").unwrap();

        for t in [0.0, 11.0, 22.0, 50.0, 61.0] {
            assert!(scenes.update_frame(&XrFrame::new(t), t).is_some());
        }
        let metrics = scenes.metrics();
        assert_eq!(metrics.total_frames, 5);
        assert_eq!(metrics.dropped_frames, 1);
        assert_eq!(metrics.max_frame_time_ms, 28.0);
    }

    fn mover() -> SceneObject {
        SceneObject::new("mover", ObjectType::Mesh, Transform::IDENTITY).with_component(ComponentKind::Transform(
            TransformComponent {
                linear_velocity: Vec3::new(1.0, 0.0, 0.0),
                angular_velocity: Vec3::ZERO,
            },
        ))
    }

    fn mover_x(scenes: &SceneService) -> f32 {
        scenes.scene("a").unwrap().object("mover").unwrap().transform.position.x
    }

    #[tokio::test]
    async fn test_pause_and_restart_do_not_integrate_the_gap() {
        let mut manager = active_session().await;
        let mut scenes = SceneService::new(SceneConfig::default(), manager.handle(), EventBus::new());
        scenes.create_scene(SceneData::new("a", "A", vec![mover()]), None).unwrap();
        scenes.activate_scene("a").unwrap();
        scenes.update_frame(&XrFrame::new(0.0), 0.0);
        scenes.update_frame(&XrFrame::new(11.0), 11.0);
        let x = mover_x(&scenes);

        assert!(manager.pause());
        assert!(scenes.update_frame(&XrFrame::new(30_000.0), 30_000.0).is_none());
        assert!(manager.resume());
        let report = scenes.update_frame(&XrFrame::new(60_000.0), 60_000.0).unwrap();
        assert_eq!(report.delta_ms, 0.0);
        assert_eq!(report.metrics.dropped_frames, 0);
        assert_eq!(mover_x(&scenes), x);
        assert_eq!(scenes.update_frame(&XrFrame::new(60_011.0), 60_011.0).unwrap().delta_ms, 11.0);

        manager.end_session().await;
        manager.start_session(&SessionConfig::default()).await.unwrap();
        let x = mover_x(&scenes);
        let report = scenes.update_frame(&XrFrame::new(120_000.0), 120_000.0).unwrap();
        assert_eq!(report.delta_ms, 0.0);
        assert_eq!(mover_x(&scenes), x);
    }

    #[tokio::test]
    async fn test_switching_scenes_starts_a_new_baseline() {
        let manager = active_session().await;
        let mut scenes = SceneService::new(SceneConfig::default(), manager.handle(), EventBus::new());
        scenes.create_scene(SceneData::new("a", "A", vec![mover()]), None).unwrap();
        scenes.create_scene(SceneData::new("b", "B", vec![]), None).unwrap();
        scenes.activate_scene("b").unwrap();
        scenes.update_frame(&XrFrame::new(0.0), 0.0);

        scenes.activate_scene("a").unwrap();
        let report = scenes.update_frame(&XrFrame::new(5_000.0), 5_000.0).unwrap();
        assert_eq!(report.delta_ms, 0.0);
        assert_eq!(mover_x(&scenes), 0.0);
    }

    #[test]
    fn test_directory_tracks_live_objects() {
        let mut scenes = SceneService::new(SceneConfig::default(), SessionHandle::default(), EventBus::new());
        let directory = scenes.directory();
        scenes.create_scene(SceneData::new("a", "A", vec![mover()]), None).unwrap();
        assert!(directory.contains_object("a", "mover"));

        scenes.update_scene("a", ScenePatch::default().remove("mover")).unwrap();
        assert!(!directory.contains_object("a", "mover"));

        scenes.activate_scene("a").unwrap();
        scenes.delete_scene("a");
        assert!(directory.active().is_none());
        assert!(!directory.contains_object("a", "mover"));
    }
}
