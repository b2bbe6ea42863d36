//! Error taxonomy for the session, tracking, interaction and scene services

use thiserror::Error;

use crate::session::SessionMode;
use crate::tracking::TrackingSource;

pub type Result<T> = std::result::Result<T, XrError>;

#[derive(Debug, Error)]
pub enum XrError {
    /// The platform cannot grant the requested session mode.
    #[error("session mode {0} is not supported on this platform")]
    UnsupportedMode(SessionMode),

    /// Platform negotiation rejected the request.
    #[error("failed to start {mode} session: {reason}")]
    SessionStartError { mode: SessionMode, reason: String },

    #[error("invalid session configuration: {0}")]
    InvalidSessionConfig(String),

    /// Scene rejected before any state was touched.
    #[error("invalid scene data: {0}")]
    InvalidSceneData(String),

    #[error("scene '{0}' not found")]
    SceneNotFound(String),

    #[error("no tracking data for {0}")]
    NoTrackingData(TrackingSource),

    /// Logged and skipped during dispatch, never returned from it.
    #[error("no handler registered for key '{handler_key}' (interaction '{interaction_id}')")]
    NoHandlerRegistered { handler_key: String, interaction_id: String },

    /// Logged during dispatch, never returned from it.
    #[error("haptic feedback unavailable: {0}")]
    HapticFeedbackUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl XrError {
    /// Session-level failures are the only ones a caller must decide on.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            XrError::UnsupportedMode(_)
                | XrError::SessionStartError { .. }
                | XrError::InvalidSessionConfig(_)
        )
    }
}
