//! Engine-wide configuration
//!
//! Every section has a `Default` and `#[serde(default)]`, so a JSON file only
//! needs the keys it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, XrError};
use crate::interaction::InteractionConfig;
use crate::scene::SceneConfig;
use crate::session::SessionConfig;
use crate::tracking::TrackingConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used when `start_session` is called without options.
    pub session: SessionConfig,
    pub tracking: TrackingConfig,
    pub interaction: InteractionConfig,
    pub scene: SceneConfig,
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text).map_err(|e| XrError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading engine configuration");
        let text = std::fs::read_to_string(path).map_err(|e| XrError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| XrError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        self.session
            .validate()
            .map_err(|e| XrError::Config(format!("session: {}", e)))?;

        let t = &self.tracking;
        if !t.min_frame_interval_ms.is_finite() || t.min_frame_interval_ms < 0.0 {
            return Err(XrError::Config("tracking.min_frame_interval_ms must be >= 0".to_string()));
        }
        if !(t.default_anchor_lifetime_ms > 0.0) {
            return Err(XrError::Config("tracking.default_anchor_lifetime_ms must be positive".to_string()));
        }
        for (name, value) in [
            ("tracking.head_confidence", t.head_confidence),
            ("tracking.hand_confidence", t.hand_confidence),
            ("tracking.controller_confidence", t.controller_confidence),
            ("tracking.eye_confidence", t.eye_confidence),
            ("tracking.min_confidence", t.min_confidence),
            ("interaction.gestures.joint_gesture_confidence", self.interaction.gestures.joint_gesture_confidence),
            ("interaction.gestures.button_tap_confidence", self.interaction.gestures.button_tap_confidence),
            ("interaction.haptic_intensity", self.interaction.haptic_intensity),
        ] {
            check_unit(name, value)?;
        }

        let g = &self.interaction.gestures;
        if g.custom_point_magnitude > g.custom_grab_magnitude {
            return Err(XrError::Config(
                "interaction.gestures.custom_point_magnitude exceeds custom_grab_magnitude".to_string(),
            ));
        }
        if !(g.hold_threshold_ms > 0.0) || !(g.active_timeout_ms > 0.0) {
            return Err(XrError::Config("gesture timings must be positive".to_string()));
        }
        if g.history_capacity == 0 {
            return Err(XrError::Config("interaction.gestures.history_capacity must be non-zero".to_string()));
        }
        if !(self.interaction.haptic_duration_ms >= 0.0) {
            return Err(XrError::Config("interaction.haptic_duration_ms must be >= 0".to_string()));
        }

        if !(self.scene.target_frame_rate > 0.0) {
            return Err(XrError::Config("scene.target_frame_rate must be positive".to_string()));
        }
        if self.scene.metrics_window == 0 {
            return Err(XrError::Config("scene.metrics_window must be non-zero".to_string()));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(XrError::Config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}
