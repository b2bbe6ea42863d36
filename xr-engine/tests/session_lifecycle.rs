//! Session lifecycle through the engine facade

use std::sync::Arc;

use xr_engine::{
    DeviceProfile, EngineConfig, Pose, SessionConfig, SessionMode, SessionStatus, SimulatedPlatform, TrackingSource,
    Vec3, XrEngine, XrError, XrFrame,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn engine(profile: DeviceProfile) -> (XrEngine, Arc<SimulatedPlatform>) {
    init_tracing();
    let platform = Arc::new(SimulatedPlatform::new(profile));
    let engine = XrEngine::new(EngineConfig::default(), platform.clone()).unwrap();
    (engine, platform)
}

#[tokio::test]
async fn test_tracking_cleared_after_end() {
    let (mut engine, _) = engine(DeviceProfile::HeadMountedDisplay);
    engine.start_session(None).await.unwrap();

    let frame = XrFrame::new(0.0).with_head(Pose::at(Vec3::new(0.0, 1.6, 0.0)));
    assert!(engine.on_frame(&frame).unwrap().tracked);
    let head = engine.current_spatial_data(TrackingSource::Head).unwrap();
    assert_eq!(head.position, Vec3::new(0.0, 1.6, 0.0));

    engine.end_session().await;
    assert!(matches!(
        engine.current_spatial_data(TrackingSource::Head),
        Err(XrError::NoTrackingData(TrackingSource::Head))
    ));
    assert!(engine.on_frame(&frame).is_none());
}

#[tokio::test]
async fn test_restart_ends_previous_session_first() {
    let (mut engine, platform) = engine(DeviceProfile::HeadMountedDisplay);
    let recorder = engine.events().recorder();

    let first = engine.start_session(None).await.unwrap();
    let second = engine.start_session(None).await.unwrap();

    assert_ne!(first.context_id, second.context_id);
    assert_eq!(platform.max_concurrent_sessions(), 1);
    assert_eq!(platform.live_sessions(), 1);
    assert_eq!(recorder.names(), vec!["session:started", "session:ended", "session:started"]);
    assert!(engine.is_active());
}

#[tokio::test]
async fn test_restart_rebinds_tracking_to_new_session() {
    let (mut engine, _) = engine(DeviceProfile::HeadMountedDisplay);
    engine.start_session(None).await.unwrap();
    engine.on_frame(&XrFrame::new(0.0).with_head(Pose::at(Vec3::Y)));

    engine.start_session(None).await.unwrap();
    assert!(engine.tracking().is_tracking());
    assert!(engine.current_spatial_data(TrackingSource::Head).is_err());

    // New session has a fresh rate limiter
    assert!(engine.on_frame(&XrFrame::new(1.0).with_head(Pose::at(Vec3::Y))).unwrap().tracked);
}

#[tokio::test]
async fn test_platform_end_halts_pipeline() {
    let (mut engine, platform) = engine(DeviceProfile::HeadMountedDisplay);
    engine.start_session(None).await.unwrap();
    engine.on_frame(&XrFrame::new(0.0).with_head(Pose::at(Vec3::Y)));

    assert!(platform.end_from_device());
    engine.handle_platform_end();
    assert_eq!(engine.session_state().status, SessionStatus::Ended);
    assert!(!engine.tracking().is_tracking());
    assert!(engine.on_frame(&XrFrame::new(100.0)).is_none());

    engine.start_session(None).await.unwrap();
    assert!(engine.is_active());
    assert_eq!(platform.max_concurrent_sessions(), 1);
}

#[tokio::test]
async fn test_unsupported_mode_on_desktop() {
    let (mut engine, platform) = engine(DeviceProfile::Desktop);
    let err = engine
        .start_session(Some(SessionConfig::new(SessionMode::ImmersiveVr)))
        .await
        .unwrap_err();
    assert!(matches!(err, XrError::UnsupportedMode(SessionMode::ImmersiveVr)));
    assert!(err.is_session_error());
    assert_eq!(platform.request_count(), 0);
    assert_eq!(engine.session_state().status, SessionStatus::Idle);
}

#[tokio::test]
async fn test_inline_session_on_desktop() {
    let (mut engine, _) = engine(DeviceProfile::Desktop);
    let config = SessionConfig {
        mode: SessionMode::Inline,
        required_features: vec![],
        optional_features: vec![],
        reference_space: xr_engine::ReferenceSpaceType::Viewer,
    };
    let session = engine.start_session(Some(config)).await.unwrap();
    assert_eq!(session.mode, SessionMode::Inline);
    assert!(session.granted_features.is_empty());
}
