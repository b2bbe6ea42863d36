//! XR session and spatial-tracking engine
//!
//! Core services driven from the host's platform frame callback:
//! - Session lifecycle negotiated with an [`XrPlatform`]
//! - Rate-limited head, hand, controller and eye tracking with spatial anchors
//! - Gesture recognition and prioritized interaction dispatch
//! - Scene registry with per-frame component updates and frame metrics

pub mod anchors;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gesture;
pub mod input;
pub mod interaction;
pub mod math;
pub mod metrics;
pub mod platform;
pub mod scene;
pub mod session;
pub mod tracking;

pub use anchors::{AnchorId, AnchorTrackingState, SpatialAnchor};
pub use config::EngineConfig;
pub use engine::{FrameOutput, XrEngine};
pub use error::{Result, XrError};
pub use events::{EventBus, EventRecorder, SubscriptionId, XrEvent};
pub use gesture::{Gesture, GestureConfig, GestureType, GESTURE_CONFIDENCE_FLOOR};
pub use input::*;
pub use interaction::{
    DispatchReport, DispatchScope, Interaction, InteractionConditions, InteractionConfig, InteractionContext,
    InteractionHandler, InteractionService,
};
pub use math::*;
pub use metrics::PerformanceMetrics;
pub use platform::{DeviceProfile, FeatureRequest, GrantedSession, HapticActuator, SimulatedPlatform, XrPlatform};
pub use scene::*;
pub use session::*;
pub use tracking::{SpatialTrackingService, TrackedPose, TrackingConfig, TrackingSource};
