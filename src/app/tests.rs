use super::*;
use crate::camera::{FrameSource, SourceAccess, TestPatternSource};
use crate::config::TwiboothConfig;
use crate::events::{BoothEvent, EventFilter, EventReceiver};
use crate::session::DeviceState;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> TwiboothConfig {
    let mut config = TwiboothConfig::default();
    config.camera.resolution = (320, 240);
    config.camera.ready_timeout_ms = 2000;
    config.compositor.output_height = 320;
    config.session.flash_duration_ms = 50;
    config.storage.path = dir.path().to_string_lossy().to_string();
    config.gallery.enabled = false;
    config.system.keyboard = false;
    config
}

async fn create_orchestrator(
    dir: &TempDir,
) -> (TwiboothOrchestrator, Arc<TestPatternSource>) {
    let config = create_test_config(dir);
    let source = Arc::new(TestPatternSource::from_config(&config.camera));
    let orchestrator =
        TwiboothOrchestrator::with_source(config, Arc::clone(&source) as Arc<dyn FrameSource>)
            .await
            .unwrap();
    (orchestrator, source)
}

async fn next_event(receiver: &mut EventReceiver) -> BoothEvent {
    tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let dir = TempDir::new().unwrap();
    let (orchestrator, source) = create_orchestrator(&dir).await;

    assert!(orchestrator.get_all_component_states().await.is_empty());
    assert_eq!(orchestrator.session().device_state(), DeviceState::NoDevice);
    // nothing is acquired before start
    assert_eq!(source.acquired_count(), 0);
}

#[tokio::test]
async fn test_component_state_management() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, _source) = create_orchestrator(&dir).await;

    orchestrator.initialize().await.unwrap();
    let states = orchestrator.get_all_component_states().await;
    assert_eq!(states.get("session"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("requests"), Some(&ComponentState::Stopped));
    assert!(!states.contains_key("keyboard"));
    assert!(!states.contains_key("gallery_feed"));

    orchestrator
        .set_component_state("session", ComponentState::Failed)
        .await;
    assert_eq!(
        orchestrator.get_component_state("session").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(orchestrator.failed_components().await, vec!["session"]);
}

#[tokio::test]
async fn test_start_acquires_camera() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, source) = create_orchestrator(&dir).await;

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.session().device_state(), DeviceState::Ready);
    assert_eq!(
        orchestrator.get_component_state("session").await,
        Some(ComponentState::Running)
    );
    assert_eq!(source.active_streams().len(), 1);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_without_camera_keeps_running() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, source) = create_orchestrator(&dir).await;
    source.set_access(SourceAccess::Denied);

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.session().device_state(), DeviceState::NoDevice);
    assert_eq!(
        orchestrator.get_component_state("session").await,
        Some(ComponentState::Failed)
    );
    assert_eq!(
        orchestrator.get_component_state("requests").await,
        Some(ComponentState::Running)
    );

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capture_request_stores_photo() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, _source) = create_orchestrator(&dir).await;
    let bus = orchestrator.event_bus();
    let mut captured = EventReceiver::new(
        bus.subscribe(),
        EventFilter::EventTypes(vec!["photo_captured"]),
        "test",
    );

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    bus.publish(BoothEvent::CaptureRequested {
        timestamp: SystemTime::now(),
    })
    .await
    .unwrap();

    let BoothEvent::PhotoCaptured {
        photo_id,
        overlay_id,
        ..
    } = next_event(&mut captured).await
    else {
        panic!("expected PhotoCaptured");
    };
    assert_eq!(overlay_id, None);

    let photos = orchestrator.photos().list_all().await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].id, photo_id);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_switch_request_flips_facing() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, source) = create_orchestrator(&dir).await;
    let bus = orchestrator.event_bus();
    let mut states = EventReceiver::new(
        bus.subscribe(),
        EventFilter::EventTypes(vec!["device_state_changed"]),
        "test",
    );

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();
    let initial = orchestrator.session().facing().await;
    states.drain();

    bus.publish(BoothEvent::SwitchFacingRequested {
        timestamp: SystemTime::now(),
    })
    .await
    .unwrap();

    loop {
        if let BoothEvent::DeviceStateChanged { state, facing } = next_event(&mut states).await {
            if state == "ready" {
                assert_eq!(facing, initial.toggled());
                break;
            }
        }
    }
    assert_eq!(source.active_streams().len(), 1);
    assert_eq!(source.released_count(), 1);

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_overlay_position_raises_notice() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, _source) = create_orchestrator(&dir).await;
    let bus = orchestrator.event_bus();
    let mut notices = EventReceiver::new(
        bus.subscribe(),
        EventFilter::EventTypes(vec!["notice"]),
        "test",
    );

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    bus.publish(BoothEvent::OverlaySelectionRequested { position: Some(3) })
        .await
        .unwrap();

    let BoothEvent::Notice { title, .. } = next_event(&mut notices).await else {
        panic!("expected Notice");
    };
    assert_eq!(title, "Overlay Unavailable");

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_quit_request_shuts_down_and_releases_camera() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, source) = create_orchestrator(&dir).await;
    let bus = orchestrator.event_bus();

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.publish(BoothEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: "test".to_string(),
        })
        .await
        .unwrap();
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 0);
    assert!(source.active_streams().is_empty());
    assert_eq!(orchestrator.session().device_state(), DeviceState::NoDevice);
    assert_eq!(
        orchestrator.get_component_state("requests").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_switch_request_during_shutdown_leaves_camera_released() {
    let dir = TempDir::new().unwrap();
    let (mut orchestrator, source) = create_orchestrator(&dir).await;
    let bus = orchestrator.event_bus();

    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    for _ in 0..3 {
        bus.publish(BoothEvent::SwitchFacingRequested {
            timestamp: SystemTime::now(),
        })
        .await
        .unwrap();
    }
    tokio::task::yield_now().await;

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    assert!(orchestrator.session().is_closed());
    assert!(source.active_streams().is_empty());
    assert_eq!(orchestrator.session().device_state(), DeviceState::NoDevice);

    // nothing reopens the camera afterwards
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(source.active_streams().is_empty());
}
