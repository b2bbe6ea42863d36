//! Host XR platform abstraction and a simulated device for hosts without hardware

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use crate::input::InputSourceId;
use crate::session::{SessionFeature, SessionMode};

/// Features asked for in a session request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRequest {
    pub required: BTreeSet<SessionFeature>,
    pub optional: BTreeSet<SessionFeature>,
}

/// What the platform granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedSession {
    /// View/context identifier echoed in the session-ended event.
    pub context_id: u64,
    pub granted_features: BTreeSet<SessionFeature>,
}

/// Session negotiation entry points of the host XR runtime.
///
/// Per-frame data is pushed into the engine as [`crate::input::XrFrame`] values and the
/// end signal arrives through [`crate::engine::XrEngine::handle_platform_end`].
#[async_trait]
pub trait XrPlatform: Send + Sync {
    async fn is_session_supported(&self, mode: SessionMode) -> bool;

    async fn request_session(
        &self,
        mode: SessionMode,
        features: &FeatureRequest,
    ) -> anyhow::Result<GrantedSession>;

    async fn end_session(&self, context_id: u64) -> anyhow::Result<()>;
}

/// Vibration actuators on input sources
pub trait HapticActuator: Send + Sync {
    fn pulse(&self, source: InputSourceId, intensity: f32, duration_ms: f32) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProfile {
    HeadMountedDisplay,
    HandheldAr,
    Desktop,
    Web,
}

impl DeviceProfile {
    pub fn supported_modes(self) -> &'static [SessionMode] {
        match self {
            DeviceProfile::HeadMountedDisplay => &[
                SessionMode::Inline,
                SessionMode::ImmersiveVr,
                SessionMode::ImmersiveAr,
            ],
            DeviceProfile::HandheldAr => &[SessionMode::Inline, SessionMode::ImmersiveAr],
            DeviceProfile::Desktop => &[SessionMode::Inline],
            DeviceProfile::Web => &[SessionMode::Inline, SessionMode::ImmersiveVr],
        }
    }

    pub fn supported_features(self) -> &'static [SessionFeature] {
        use SessionFeature::*;
        match self {
            DeviceProfile::HeadMountedDisplay => &[
                Local,
                LocalFloor,
                BoundedFloor,
                Unbounded,
                HandTracking,
                EyeTracking,
                Anchors,
                HitTest,
                Layers,
            ],
            DeviceProfile::HandheldAr => &[Local, LocalFloor, Anchors, HitTest, DomOverlay],
            DeviceProfile::Desktop => &[Local],
            DeviceProfile::Web => &[Local, LocalFloor, Layers],
        }
    }

    pub fn has_haptics(self) -> bool {
        matches!(self, DeviceProfile::HeadMountedDisplay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HapticPulse {
    pub source: InputSourceId,
    pub intensity: f32,
    pub duration_ms: f32,
}

#[derive(Debug, Default)]
struct SimulatedState {
    next_context_id: u64,
    live_sessions: usize,
    max_concurrent_sessions: usize,
    request_count: usize,
    reject_next: Option<String>,
    pulses: Vec<HapticPulse>,
    haptics_disabled: bool,
}

/// In-process platform emulating a device profile
#[derive(Debug)]
pub struct SimulatedPlatform {
    profile: DeviceProfile,
    state: Mutex<SimulatedState>,
}

impl SimulatedPlatform {
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            state: Mutex::new(SimulatedState {
                next_context_id: 1,
                ..SimulatedState::default()
            }),
        }
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Make the next `request_session` fail with `reason`.
    pub fn reject_next_request(&self, reason: &str) {
        self.lock().reject_next = Some(reason.to_string());
    }

    /// Drop the live session on the device side, as when the headset is
    /// removed. The host still has to forward the signal to the engine.
    pub fn end_from_device(&self) -> bool {
        let mut state = self.lock();
        if state.live_sessions == 0 {
            return false;
        }
        state.live_sessions -= 1;
        true
    }

    pub fn set_haptics_enabled(&self, enabled: bool) {
        self.lock().haptics_disabled = !enabled;
    }

    pub fn live_sessions(&self) -> usize {
        self.lock().live_sessions
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.lock().max_concurrent_sessions
    }

    pub fn request_count(&self) -> usize {
        self.lock().request_count
    }

    pub fn pulses(&self) -> Vec<HapticPulse> {
        self.lock().pulses.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl XrPlatform for SimulatedPlatform {
    async fn is_session_supported(&self, mode: SessionMode) -> bool {
        self.profile.supported_modes().contains(&mode)
    }

    async fn request_session(
        &self,
        mode: SessionMode,
        features: &FeatureRequest,
    ) -> anyhow::Result<GrantedSession> {
        let mut state = self.lock();
        state.request_count += 1;

        if let Some(reason) = state.reject_next.take() {
            bail!(reason);
        }
        if !self.profile.supported_modes().contains(&mode) {
            bail!("{mode} is not available on {:?}", self.profile);
        }
        if state.live_sessions > 0 {
            bail!("an immersive session is already running");
        }

        let supported = self.profile.supported_features();
        if let Some(missing) = features.required.iter().find(|f| !supported.contains(f)) {
            return Err(anyhow!("required feature {missing:?} is not supported"));
        }

        let granted_features = features
            .required
            .iter()
            .chain(features.optional.iter().filter(|f| supported.contains(f)))
            .copied()
            .collect();

        let context_id = state.next_context_id;
        state.next_context_id += 1;
        state.live_sessions += 1;
        state.max_concurrent_sessions = state.max_concurrent_sessions.max(state.live_sessions);

        Ok(GrantedSession {
            context_id,
            granted_features,
        })
    }

    async fn end_session(&self, _context_id: u64) -> anyhow::Result<()> {
        let mut state = self.lock();
        if state.live_sessions == 0 {
            bail!("no session to end");
        }
        state.live_sessions -= 1;
        Ok(())
    }
}

impl HapticActuator for SimulatedPlatform {
    fn pulse(&self, source: InputSourceId, intensity: f32, duration_ms: f32) -> anyhow::Result<()> {
        let mut state = self.lock();
        if !self.profile.has_haptics() || state.haptics_disabled {
            bail!("{:?} has no haptic actuators", self.profile);
        }
        state.pulses.push(HapticPulse {
            source,
            intensity: intensity.clamp(0.0, 1.0),
            duration_ms,
        });
        Ok(())
    }
}
