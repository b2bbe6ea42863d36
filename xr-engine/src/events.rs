//! Typed publish/subscribe feed for lifecycle and per-frame updates
//!
//! Listeners are fire-and-forget: emitting never fails and never waits on a
//! listener result. A listener may emit further events from inside its callback.

use std::sync::{Arc, Mutex, PoisonError};

use crate::anchors::{AnchorId, SpatialAnchor};
use crate::gesture::Gesture;
use crate::session::{SessionEndReason, SessionFeature, SessionMode};
use crate::tracking::TrackedPose;

/// Events emitted by the engine components
#[derive(Debug, Clone, PartialEq)]
pub enum XrEvent {
    SessionStarted {
        mode: SessionMode,
        context_id: u64,
        features: Vec<SessionFeature>,
    },
    SessionEnded {
        previous_context_id: u64,
        reason: SessionEndReason,
    },
    SessionPaused {
        context_id: u64,
    },
    SessionResumed {
        context_id: u64,
    },

    HeadTracked(TrackedPose),
    HandTracked(TrackedPose),
    ControllerTracked(TrackedPose),
    EyeTracked(TrackedPose),

    SpatialAnchorCreated(SpatialAnchor),
    SpatialAnchorRemoved {
        id: AnchorId,
        expired: bool,
    },

    GestureProcessed(Gesture),
    InteractionExecuted {
        interaction_id: String,
        scene_id: String,
        target_object_id: String,
        handler_key: String,
    },

    SceneActivated {
        scene_id: String,
    },
    SceneDeactivated {
        scene_id: String,
    },
}

impl XrEvent {
    /// Stable name used by UI overlays that subscribe by string.
    pub fn name(&self) -> &'static str {
        match self {
            XrEvent::SessionStarted { .. } => "session:started",
            XrEvent::SessionEnded { .. } => "session:ended",
            XrEvent::SessionPaused { .. } => "session:paused",
            XrEvent::SessionResumed { .. } => "session:resumed",
            XrEvent::HeadTracked(_) => "tracking:head",
            XrEvent::HandTracked(_) => "tracking:hand",
            XrEvent::ControllerTracked(_) => "tracking:controller",
            XrEvent::EyeTracked(_) => "tracking:eye",
            XrEvent::SpatialAnchorCreated(_) => "spatialAnchorCreated",
            XrEvent::SpatialAnchorRemoved { .. } => "spatialAnchorRemoved",
            XrEvent::GestureProcessed(_) => "gestureProcessed",
            XrEvent::InteractionExecuted { .. } => "interactionExecuted",
            XrEvent::SceneActivated { .. } => "sceneActivated",
            XrEvent::SceneDeactivated { .. } => "sceneDeactivated",
        }
    }
}

type Listener = Arc<dyn Fn(&XrEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener)>,
}

/// Cloneable handle to a shared listener list
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&XrEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        listeners.entries.len() != before
    }

    pub fn emit(&self, event: XrEvent) {
        // Snapshot so listeners can re-enter the bus
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        tracing::trace!(event = event.name(), listeners = snapshot.len(), "emit");
        for listener in snapshot {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Subscribe a listener that keeps every event, for overlays and tests.
    pub fn recorder(&self) -> EventRecorder {
        let recorder = EventRecorder::default();
        let sink = Arc::clone(&recorder.events);
        self.subscribe(move |event| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        });
        recorder
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<XrEvent>>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<XrEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(XrEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
