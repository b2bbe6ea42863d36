//! Immersive session lifecycle
//!
//! `SessionManager` is the single writer of the session state. Every other
//! component observes it through a cloned [`SessionHandle`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, XrError};
use crate::events::{EventBus, XrEvent};
use crate::platform::{FeatureRequest, XrPlatform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionMode {
    Inline,
    ImmersiveVr,
    ImmersiveAr,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionMode::Inline => "inline",
            SessionMode::ImmersiveVr => "immersive-vr",
            SessionMode::ImmersiveAr => "immersive-ar",
        })
    }
}

/// Capability features negotiated with the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionFeature {
    Local,
    LocalFloor,
    BoundedFloor,
    Unbounded,
    HandTracking,
    EyeTracking,
    Anchors,
    HitTest,
    Layers,
    DomOverlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceSpaceType {
    Viewer,
    Local,
    #[default]
    LocalFloor,
    BoundedFloor,
    Unbounded,
}

impl ReferenceSpaceType {
    /// Feature that must be granted before this space can be requested.
    pub fn required_feature(self) -> Option<SessionFeature> {
        match self {
            ReferenceSpaceType::Viewer | ReferenceSpaceType::Local => None,
            ReferenceSpaceType::LocalFloor => Some(SessionFeature::LocalFloor),
            ReferenceSpaceType::BoundedFloor => Some(SessionFeature::BoundedFloor),
            ReferenceSpaceType::Unbounded => Some(SessionFeature::Unbounded),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Idle,
    Starting,
    Active,
    Paused,
    Ended,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// `end_session` was called by the host.
    Requested,
    /// The device ended the session, e.g. the headset was removed.
    Platform,
}

/// Options for `start_session`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub required_features: Vec<SessionFeature>,
    pub optional_features: Vec<SessionFeature>,
    pub reference_space: ReferenceSpaceType,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::ImmersiveVr,
            required_features: vec![SessionFeature::LocalFloor],
            optional_features: vec![SessionFeature::HandTracking, SessionFeature::Anchors],
            reference_space: ReferenceSpaceType::LocalFloor,
        }
    }
}

impl SessionConfig {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_required(mut self, feature: SessionFeature) -> Self {
        if !self.required_features.contains(&feature) {
            self.required_features.push(feature);
        }
        self
    }

    pub fn with_optional(mut self, feature: SessionFeature) -> Self {
        if !self.optional_features.contains(&feature) {
            self.optional_features.push(feature);
        }
        self
    }

    pub fn with_reference_space(mut self, space: ReferenceSpaceType) -> Self {
        self.reference_space = space;
        self
    }

    /// Rejects configurations that can never produce a usable session.
    pub fn validate(&self) -> Result<()> {
        if let Some(feature) = self.reference_space.required_feature() {
            let requested = self.required_features.contains(&feature)
                || self.optional_features.contains(&feature);
            if !requested {
                return Err(XrError::InvalidSessionConfig(format!(
                    "reference space {:?} needs feature {:?}, which is not requested",
                    self.reference_space, feature
                )));
            }
        }
        if self.mode == SessionMode::Inline && self.required_features.contains(&SessionFeature::HandTracking) {
            return Err(XrError::InvalidSessionConfig(
                "inline sessions cannot require hand tracking".to_string(),
            ));
        }
        Ok(())
    }

    fn feature_request(&self) -> FeatureRequest {
        FeatureRequest {
            required: self.required_features.iter().copied().collect(),
            optional: self.optional_features.iter().copied().collect(),
        }
    }
}

/// A live, negotiated session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub context_id: u64,
    pub mode: SessionMode,
    pub granted_features: BTreeSet<SessionFeature>,
    pub reference_space: ReferenceSpaceType,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn has_feature(&self, feature: SessionFeature) -> bool {
        self.granted_features.contains(&feature)
    }
}

/// Pure read of the manager's state
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionState {
    pub status: SessionStatus,
    pub mode: Option<SessionMode>,
    pub granted_features: BTreeSet<SessionFeature>,
    pub started_at: Option<DateTime<Utc>>,
    pub context_id: Option<u64>,
    /// Incremented every time a session reaches `Active` from `Starting`.
    pub generation: u64,
    /// Incremented on every entry into `Active`, resumes included.
    pub activation: u64,
}

/// Read-only view of the session shared with downstream components
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().unwrap_or_else(PoisonError::into_inner).status
    }

    pub fn is_active(&self) -> bool {
        self.status() == SessionStatus::Active
    }

    pub fn generation(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).generation
    }

    pub fn activation(&self) -> u64 {
        self.state.read().unwrap_or_else(PoisonError::into_inner).activation
    }

    pub fn has_feature(&self, feature: SessionFeature) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .granted_features
            .contains(&feature)
    }

    fn write(&self, f: impl FnOnce(&mut SessionState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

pub struct SessionManager {
    platform: Arc<dyn XrPlatform>,
    session: Option<Session>,
    handle: SessionHandle,
    events: EventBus,
}

impl SessionManager {
    pub fn new(platform: Arc<dyn XrPlatform>, events: EventBus) -> Self {
        Self {
            platform,
            session: None,
            handle: SessionHandle::default(),
            events,
        }
    }

    /// Handle for components that only observe the session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Negotiate and start a session, ending any live one first.
    ///
    /// A malformed `config` also ends the live session before the status
    /// moves to `Error`; no platform session outlives the manager's view of it.
    pub async fn start_session(&mut self, config: &SessionConfig) -> Result<Session> {
        let valid = config.validate();

        if self.session.is_some() {
            info!("ending current session before starting a new one");
            self.end_session().await;
        }

        if let Err(e) = valid {
            warn!(error = %e, "rejecting malformed session configuration");
            self.set_status(SessionStatus::Error);
            return Err(e);
        }

        if !self.platform.is_session_supported(config.mode).await {
            warn!(mode = %config.mode, "session mode not supported");
            self.set_status(SessionStatus::Idle);
            return Err(XrError::UnsupportedMode(config.mode));
        }

        self.set_status(SessionStatus::Starting);
        debug!(mode = %config.mode, "requesting session from platform");

        let granted = match self.platform.request_session(config.mode, &config.feature_request()).await {
            Ok(granted) => granted,
            Err(e) => {
                warn!(mode = %config.mode, error = %e, "platform rejected session request");
                self.set_status(SessionStatus::Idle);
                return Err(XrError::SessionStartError {
                    mode: config.mode,
                    reason: e.to_string(),
                });
            }
        };

        let session = Session {
            context_id: granted.context_id,
            mode: config.mode,
            granted_features: granted.granted_features,
            reference_space: config.reference_space,
            started_at: Utc::now(),
        };

        self.handle.write(|state| {
            state.status = SessionStatus::Active;
            state.mode = Some(session.mode);
            state.granted_features = session.granted_features.clone();
            state.started_at = Some(session.started_at);
            state.context_id = Some(session.context_id);
            state.generation += 1;
            state.activation += 1;
        });
        self.session = Some(session.clone());

        info!(
            mode = %session.mode,
            context_id = session.context_id,
            features = session.granted_features.len(),
            "session started"
        );
        self.events.emit(XrEvent::SessionStarted {
            mode: session.mode,
            context_id: session.context_id,
            features: session.granted_features.iter().copied().collect(),
        });

        Ok(session)
    }

    /// Caller-initiated end. A platform failure while ending is logged and
    /// teardown still happens.
    pub async fn end_session(&mut self) {
        let Some(context_id) = self.session.as_ref().map(|s| s.context_id) else {
            debug!("end_session called without a live session");
            return;
        };

        if let Err(e) = self.platform.end_session(context_id).await {
            warn!(context_id, error = %e, "platform failed to end session cleanly");
        }
        self.teardown(SessionEndReason::Requested);
    }

    /// Device-initiated end signal.
    pub fn handle_platform_end(&mut self) {
        if self.session.is_none() {
            debug!("platform end signal without a live session");
            return;
        }
        self.teardown(SessionEndReason::Platform);
    }

    /// Platform visibility lost; the frame pipeline halts until `resume`.
    pub fn pause(&mut self) -> bool {
        self.transition_paused(SessionStatus::Active, SessionStatus::Paused)
    }

    pub fn resume(&mut self) -> bool {
        self.transition_paused(SessionStatus::Paused, SessionStatus::Active)
    }

    fn transition_paused(&mut self, from: SessionStatus, to: SessionStatus) -> bool {
        let Some(context_id) = self.session.as_ref().map(|s| s.context_id) else {
            return false;
        };
        if self.handle.status() != from {
            return false;
        }
        self.handle.write(|state| {
            state.status = to;
            if to == SessionStatus::Active {
                state.activation += 1;
            }
        });

        let event = if to == SessionStatus::Paused {
            XrEvent::SessionPaused { context_id }
        } else {
            XrEvent::SessionResumed { context_id }
        };
        debug!(context_id, status = ?to, "session visibility changed");
        self.events.emit(event);
        true
    }

    fn teardown(&mut self, reason: SessionEndReason) {
        let Some(previous) = self.session.take() else {
            return;
        };

        self.handle.write(|state| {
            state.status = SessionStatus::Ended;
            state.mode = None;
            state.granted_features.clear();
            state.started_at = None;
            state.context_id = None;
        });

        info!(context_id = previous.context_id, ?reason, "session ended");
        self.events.emit(XrEvent::SessionEnded {
            previous_context_id: previous.context_id,
            reason,
        });
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.handle.write(|state| state.status = status);
    }
}
