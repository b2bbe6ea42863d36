//! Interaction tables, gesture dispatch and haptic feedback
//!
//! Interactions are registered per scene and indexed by `(gesture type, target
//! object)`. Targets are looked up in the live scene registry at dispatch time.
//! Matching goes across scenes in registration order, then matches are
//! dispatched by descending priority. Per-frame failures (missing handler,
//! handler error, haptics) are logged and never abort the remaining dispatch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::XrError;
use crate::events::{EventBus, XrEvent};
use crate::gesture::{
    classify_hand, reclassify, Gesture, GestureConfig, GestureHistory, GestureType, SourceGestureState,
};
use crate::input::{Hand, InputSource, InputSourceId, XrFrame};
use crate::math::Vec3;
use crate::platform::HapticActuator;
use crate::scene::{ComponentKind, Scene, SceneDirectory};
use crate::session::SessionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchScope {
    /// Match against every registered scene.
    #[default]
    AllScenes,
    /// Match only against the scene last reported active.
    ActiveScene,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    pub gestures: GestureConfig,
    pub dispatch_scope: DispatchScope,
    pub haptic_intensity: f32,
    pub haptic_duration_ms: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            gestures: GestureConfig::default(),
            dispatch_scope: DispatchScope::AllScenes,
            haptic_intensity: 0.5,
            haptic_duration_ms: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InteractionConditions {
    pub handedness: Option<Hand>,
    pub min_confidence: Option<f32>,
}

impl InteractionConditions {
    pub fn accepts(&self, gesture: &Gesture) -> bool {
        if let Some(hand) = self.handedness {
            if gesture.handedness != hand {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if gesture.confidence < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub gesture_type: GestureType,
    pub target_object_id: String,
    pub handler_key: String,
    pub conditions: InteractionConditions,
    pub priority: i32,
    pub enabled: bool,
}

impl Interaction {
    pub fn new(id: &str, gesture_type: GestureType, target: &str, handler_key: &str) -> Self {
        Self {
            id: id.to_string(),
            gesture_type,
            target_object_id: target.to_string(),
            handler_key: handler_key.to_string(),
            conditions: InteractionConditions::default(),
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_conditions(mut self, conditions: InteractionConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn matches(&self, gesture: &Gesture) -> bool {
        self.enabled && self.gesture_type == gesture.gesture_type && self.conditions.accepts(gesture)
    }
}

/// What a handler sees when its interaction fires
#[derive(Debug)]
pub struct InteractionContext<'a> {
    pub scene_id: &'a str,
    pub interaction: &'a Interaction,
    pub gesture: &'a Gesture,
    pub source: Option<&'a InputSource>,
}

pub trait InteractionHandler: Send {
    fn handle(&mut self, ctx: &InteractionContext<'_>) -> anyhow::Result<()>;
}

impl<F> InteractionHandler for F
where
    F: FnMut(&InteractionContext<'_>) -> anyhow::Result<()> + Send,
{
    fn handle(&mut self, ctx: &InteractionContext<'_>) -> anyhow::Result<()> {
        self(ctx)
    }
}

#[derive(Debug, Default)]
struct SceneInteractions {
    scene_id: String,
    /// Built from the scene's interaction components; replaced on every setup.
    declared: Vec<Interaction>,
    /// Added through `register_interaction`; survives setup.
    registered: Vec<Interaction>,
    /// Positions in `iter()` order.
    by_key: HashMap<(GestureType, String), Vec<usize>>,
}

impl SceneInteractions {
    fn new(scene_id: &str) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            ..Self::default()
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Interaction> {
        self.declared.iter().chain(self.registered.iter())
    }

    fn get(&self, index: usize) -> &Interaction {
        match index.checked_sub(self.declared.len()) {
            Some(i) => &self.registered[i],
            None => &self.declared[index],
        }
    }

    fn register(&mut self, interaction: Interaction) {
        self.registered.push(interaction);
        self.reindex();
    }

    fn replace_declared(&mut self, declared: Vec<Interaction>) {
        self.declared = declared;
        self.reindex();
    }

    fn reindex(&mut self) {
        let mut by_key: HashMap<(GestureType, String), Vec<usize>> = HashMap::new();
        for (index, interaction) in self.iter().enumerate() {
            let key = (interaction.gesture_type, interaction.target_object_id.clone());
            by_key.entry(key).or_default().push(index);
        }
        self.by_key = by_key;
    }
}

/// Outcome of an accepted gesture
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchReport {
    /// The gesture after reclassification.
    pub gesture: Option<Gesture>,
    /// Interaction ids whose handler ran successfully, in dispatch order.
    pub executed: Vec<String>,
    /// Interaction ids that matched but had no handler or whose handler failed.
    pub skipped: Vec<String>,
    pub haptics_triggered: bool,
}

struct Match {
    scene_id: String,
    interaction: Interaction,
}

pub struct InteractionService {
    config: InteractionConfig,
    session: SessionHandle,
    directory: SceneDirectory,
    scenes: Vec<SceneInteractions>,
    handlers: HashMap<String, Box<dyn InteractionHandler>>,
    history: GestureHistory,
    active: VecDeque<Gesture>,
    sources: HashMap<InputSourceId, SourceGestureState>,
    haptics: Option<Arc<dyn HapticActuator>>,
    events: EventBus,
}

impl InteractionService {
    pub fn new(
        config: InteractionConfig,
        session: SessionHandle,
        directory: SceneDirectory,
        events: EventBus,
    ) -> Self {
        let history = GestureHistory::new(config.gestures.history_capacity);
        Self {
            config,
            session,
            directory,
            scenes: Vec::new(),
            handlers: HashMap::new(),
            history,
            active: VecDeque::new(),
            sources: HashMap::new(),
            haptics: None,
            events,
        }
    }

    pub fn with_haptics(mut self, haptics: Arc<dyn HapticActuator>) -> Self {
        self.haptics = Some(haptics);
        self
    }

    pub fn config(&self) -> &InteractionConfig {
        &self.config
    }

    pub fn register_handler<F>(&mut self, key: &str, handler: F)
    where
        F: FnMut(&InteractionContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.register_boxed_handler(key, Box::new(handler));
    }

    pub fn register_boxed_handler(&mut self, key: &str, handler: Box<dyn InteractionHandler>) {
        if self.handlers.insert(key.to_string(), handler).is_some() {
            debug!(handler = key, "replaced interaction handler");
        }
    }

    pub fn remove_handler(&mut self, key: &str) -> bool {
        self.handlers.remove(key).is_some()
    }

    /// Rebuild the interactions declared by `scene`'s components. Ones added
    /// through [`register_interaction`](Self::register_interaction) are kept.
    pub fn setup_scene_interactions(&mut self, scene: &Scene) -> usize {
        let mut declared = Vec::new();

        for object in scene.objects.iter().filter(|o| o.interactive) {
            for component in &object.components {
                let ComponentKind::Interaction(interaction_component) = &component.kind else {
                    continue;
                };
                for (index, spec) in interaction_component.interactions.iter().enumerate() {
                    let id = spec
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("{}:{}:{}", object.id, spec.gesture, index));
                    declared.push(Interaction {
                        id,
                        gesture_type: spec.gesture,
                        target_object_id: object.id.clone(),
                        handler_key: spec.handler.clone(),
                        conditions: InteractionConditions {
                            handedness: spec.handedness,
                            min_confidence: spec.min_confidence,
                        },
                        priority: spec.priority,
                        enabled: spec.enabled && component.enabled,
                    });
                }
            }
        }

        let count = declared.len();
        debug!(scene = %scene.id, interactions = count, "scene interactions registered");
        self.table_mut(&scene.id).replace_declared(declared);
        count
    }

    fn table_mut(&mut self, scene_id: &str) -> &mut SceneInteractions {
        let index = match self.scenes.iter().position(|s| s.scene_id == scene_id) {
            Some(index) => index,
            None => {
                self.scenes.push(SceneInteractions::new(scene_id));
                self.scenes.len() - 1
            }
        };
        &mut self.scenes[index]
    }

    /// Add one interaction to a scene's table. The target is resolved at
    /// dispatch time; an unknown target never matches.
    pub fn register_interaction(&mut self, scene_id: &str, interaction: Interaction) {
        self.table_mut(scene_id).register(interaction);
    }

    pub fn remove_scene_interactions(&mut self, scene_id: &str) -> bool {
        let before = self.scenes.len();
        self.scenes.retain(|s| s.scene_id != scene_id);
        self.scenes.len() != before
    }

    pub fn has_scene(&self, scene_id: &str) -> bool {
        self.scenes.iter().any(|s| s.scene_id == scene_id)
    }

    pub fn scene_interactions(&self, scene_id: &str) -> Vec<&Interaction> {
        self.scenes
            .iter()
            .filter(|s| s.scene_id == scene_id)
            .flat_map(|s| s.iter())
            .collect()
    }

    /// Lookup through the `(type, target)` index.
    pub fn interactions_for(&self, scene_id: &str, gesture_type: GestureType, target: &str) -> Vec<&Interaction> {
        let key = (gesture_type, target.to_string());
        self.scenes
            .iter()
            .filter(|s| s.scene_id == scene_id)
            .filter_map(|s| s.by_key.get(&key).map(|indices| (s, indices)))
            .flat_map(|(s, indices)| indices.iter().map(move |i| s.get(*i)))
            .collect()
    }

    pub fn history(&self) -> &GestureHistory {
        &self.history
    }

    pub fn active_gestures(&self) -> impl Iterator<Item = &Gesture> {
        self.active.iter()
    }

    /// Accept, reclassify, match and dispatch one gesture.
    ///
    /// Returns `None` when the gesture was ignored: below the confidence floor
    /// or no active session.
    pub fn process_gesture(&mut self, gesture: Gesture, source: Option<&InputSource>) -> Option<DispatchReport> {
        if !self.session.is_active() {
            trace!("gesture ignored without an active session");
            return None;
        }
        if !gesture.is_accepted() {
            trace!(gesture = %gesture.gesture_type, confidence = gesture.confidence, "gesture below confidence floor");
            return None;
        }

        self.history.push(gesture.clone());
        let gesture = reclassify(gesture, &self.config.gestures);
        self.active.push_back(gesture.clone());
        self.events.emit(XrEvent::GestureProcessed(gesture.clone()));

        let matches = self.collect_matches(&gesture);
        let mut report = DispatchReport::default();

        for Match { scene_id, interaction } in &matches {
            let Some(handler) = self.handlers.get_mut(&interaction.handler_key) else {
                let err = XrError::NoHandlerRegistered {
                    handler_key: interaction.handler_key.clone(),
                    interaction_id: interaction.id.clone(),
                };
                warn!(error = %err, "skipping interaction");
                report.skipped.push(interaction.id.clone());
                continue;
            };

            let ctx = InteractionContext {
                scene_id,
                interaction,
                gesture: &gesture,
                source,
            };
            if let Err(e) = handler.handle(&ctx) {
                warn!(interaction = %interaction.id, error = %e, "interaction handler failed");
                report.skipped.push(interaction.id.clone());
                continue;
            }

            debug!(interaction = %interaction.id, target = %interaction.target_object_id, "interaction executed");
            report.executed.push(interaction.id.clone());
            self.events.emit(XrEvent::InteractionExecuted {
                interaction_id: interaction.id.clone(),
                scene_id: scene_id.clone(),
                target_object_id: interaction.target_object_id.clone(),
                handler_key: interaction.handler_key.clone(),
            });
        }

        if !matches.is_empty() {
            report.haptics_triggered = self.trigger_haptics(source);
        }
        report.gesture = Some(gesture);
        Some(report)
    }

    fn collect_matches(&self, gesture: &Gesture) -> Vec<Match> {
        let live_scene = match self.config.dispatch_scope {
            DispatchScope::AllScenes => None,
            DispatchScope::ActiveScene => match self.directory.active() {
                Some(id) => Some(id),
                None => return Vec::new(),
            },
        };

        let mut matches: Vec<Match> = self
            .scenes
            .iter()
            .filter(|table| live_scene.as_ref().map_or(true, |id| *id == table.scene_id))
            .flat_map(|table| {
                table
                    .iter()
                    .filter(|i| i.matches(gesture))
                    .filter(move |i| self.directory.contains_object(&table.scene_id, &i.target_object_id))
                    .map(move |i| Match {
                        scene_id: table.scene_id.clone(),
                        interaction: i.clone(),
                    })
            })
            .collect();

        // Stable: equal priorities keep registration order
        matches.sort_by(|a, b| b.interaction.priority.cmp(&a.interaction.priority));
        matches
    }

    /// Fire-and-forget pulse on the originating source.
    fn trigger_haptics(&self, source: Option<&InputSource>) -> bool {
        let Some(source) = source.filter(|s| s.has_haptics) else {
            return false;
        };
        let Some(haptics) = &self.haptics else {
            let err = XrError::HapticFeedbackUnavailable("no haptic actuator attached".to_string());
            debug!(source = source.id, error = %err, "haptics skipped");
            return false;
        };
        match haptics.pulse(source.id, self.config.haptic_intensity, self.config.haptic_duration_ms) {
            Ok(()) => true,
            Err(e) => {
                let err = XrError::HapticFeedbackUnavailable(e.to_string());
                warn!(source = source.id, error = %err, "haptic pulse failed");
                false
            }
        }
    }

    /// Age the active set and turn raw input state into gestures.
    pub fn update_frame(&mut self, frame: &XrFrame) -> Vec<DispatchReport> {
        if !self.session.is_active() {
            return Vec::new();
        }

        let timeout = self.config.gestures.active_timeout_ms;
        self.active.retain(|g| frame.time - g.timestamp <= timeout);

        let present: HashSet<InputSourceId> = frame.input_sources.iter().map(|s| s.id).collect();
        self.sources.retain(|id, _| present.contains(id));

        let mut reports = Vec::new();
        for source in &frame.input_sources {
            for gesture in self.synthesize(frame.time, source) {
                if let Some(report) = self.process_gesture(gesture, Some(source)) {
                    reports.push(report);
                }
            }
        }
        reports
    }

    fn synthesize(&mut self, time: f64, source: &InputSource) -> Vec<Gesture> {
        let Some(hand) = source.handedness else {
            return Vec::new();
        };
        let config = &self.config.gestures;
        let state = self.sources.entry(source.id).or_default();
        let origin = source.origin();
        let position = origin.map(|p| p.position).unwrap_or(Vec3::ZERO);
        let direction = origin.map(|p| p.orientation.forward());
        let mut gestures = Vec::new();

        if let Some(gamepad) = &source.gamepad {
            let pressed: Vec<bool> = gamepad.buttons.iter().map(|b| b.pressed).collect();
            let edges = state.button_edges(&pressed, time);
            for button in edges.pressed {
                trace!(source = source.id, button, "button press");
                let mut tap = Gesture::new(GestureType::Tap, hand, config.button_tap_confidence, time).at(position);
                tap.direction = direction;
                gestures.push(tap);
            }
            // Long presses are reported again on release and reclassified as holds
            for (button, held_ms) in edges.released {
                if held_ms < config.hold_threshold_ms {
                    continue;
                }
                trace!(source = source.id, button, held_ms, "button hold");
                let mut tap = Gesture::new(GestureType::Tap, hand, config.button_tap_confidence, time)
                    .at(position)
                    .with_duration(held_ms);
                tap.direction = direction;
                gestures.push(tap);
            }
        }

        if let Some(skeleton) = &source.hand {
            let detected = classify_hand(skeleton, config);
            if let Some(gesture_type) = state.hand_pose_edge(detected) {
                let mut gesture = Gesture::new(gesture_type, hand, config.joint_gesture_confidence, time).at(position);
                gesture.direction = direction;
                gestures.push(gesture);
            }
        }

        gestures
    }
}
