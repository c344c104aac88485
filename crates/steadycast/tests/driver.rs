//! End-to-end tests of the tokio driver with the simulated engine and sink.
//!
//! Time is paused, so backoff and sampling timers advance deterministically.

use std::sync::Arc;
use std::time::Duration;

use steadycast_engine::sim::{EngineCall, EngineRemote, ScriptedEngine, VirtualSink};
use steadycast_engine::{
    ChannelRequest, EngineEvent, Phase, PlayerConfig, PlayerDriver, PlayerError, PlayerHandle,
    StaticDescriptorSource, StreamDescriptor,
};
use tokio::task::JoinHandle;

struct Rig {
    handle: PlayerHandle,
    engine: EngineRemote,
    sink: VirtualSink,
    task: JoinHandle<()>,
}

fn rig(engine: ScriptedEngine, sink: VirtualSink) -> Rig {
    let remote = engine.remote();
    let (driver, handle) = PlayerDriver::new(PlayerConfig::default(), engine, sink.clone())
        .expect("default config is valid");
    let driver = driver.with_source(Arc::new(StaticDescriptorSource::new().with_demo_channel()));
    Rig {
        handle,
        engine: remote,
        sink,
        task: tokio::spawn(driver.run()),
    }
}

/// Auto-loading engine and a sink holding a steady 5 s of buffer.
fn default_rig() -> Rig {
    let sink = VirtualSink::new();
    sink.feed(5.0);
    rig(ScriptedEngine::new().with_auto_manifest(true), sink)
}

fn descriptor() -> StreamDescriptor {
    StreamDescriptor::new("7112", "A").with_fallback("B")
}

async fn wait_for_phase(handle: &PlayerHandle, phase: Phase) {
    let mut rx = handle.subscribe_phase();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|p| *p == phase))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {phase}"))
        .expect("driver stopped");
}

fn resumes(engine: &EngineRemote) -> usize {
    engine.count(|call| *call == EngineCall::ResumeLoading)
}

#[tokio::test(start_paused = true)]
async fn test_start_reaches_playing() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;

    assert_eq!(rig.engine.attached_urls(), vec!["A".to_string()]);
    assert!(!rig.sink.is_paused());
    let state = rig.handle.state();
    assert!(state.is_playing);
    assert!(!state.is_loading);
    assert!(!state.has_error);
}

#[tokio::test(start_paused = true)]
async fn test_network_fault_resumes_after_backoff() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;

    assert!(rig.engine.emit(EngineEvent::network("manifest timeout")));
    wait_for_phase(&rig.handle, Phase::Reconnecting).await;

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(resumes(&rig.engine), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(resumes(&rig.engine), 1);
    wait_for_phase(&rig.handle, Phase::Playing).await;

    // Same binding throughout.
    assert_eq!(rig.engine.count(|c| *c == EngineCall::Detach), 0);
    assert_eq!(rig.sink.source(), None);
    assert_eq!(rig.engine.attached_urls(), vec!["A".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_reconnect() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    rig.engine.emit(EngineEvent::network("drop"));
    wait_for_phase(&rig.handle, Phase::Reconnecting).await;

    rig.handle.stop().await.unwrap();
    assert_eq!(rig.handle.phase(), Phase::Idle);
    let stopped = rig.handle.state();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(resumes(&rig.engine), 0);
    assert_eq!(rig.handle.state(), stopped);
    assert!(!stopped.show_controls);

    // Second stop is acknowledged and changes nothing.
    rig.handle.stop().await.unwrap();
    assert_eq!(rig.handle.state(), stopped);
}

#[tokio::test(start_paused = true)]
async fn test_unclassified_faults_fail_over_then_give_up() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;

    rig.engine.emit(EngineEvent::other("unknown"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        rig.engine.attached_urls(),
        vec!["A".to_string(), "B".to_string()]
    );
    wait_for_phase(&rig.handle, Phase::Playing).await;

    rig.engine.emit(EngineEvent::other("unknown again"));
    wait_for_phase(&rig.handle, Phase::FatalError).await;
    let state = rig.handle.state();
    assert!(state.has_error);
    assert!(!state.is_loading);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.engine.attached_urls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_autoplay_waits_for_user() {
    let rig = rig(
        ScriptedEngine::new().with_auto_manifest(true),
        VirtualSink::new().with_autoplay_blocked(),
    );
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let state = rig.handle.state();
    assert!(!state.is_playing);
    assert!(!state.has_error);
    assert!(rig.sink.is_paused());

    // Plenty of buffer, but the monitor must not force playback.
    rig.sink.feed(8.0);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(rig.sink.is_paused());
    assert_eq!(rig.sink.play_requests(), 1);

    rig.handle.toggle_play().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!rig.sink.is_paused());
    assert!(rig.handle.state().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_retunes_engine_on_thin_buffer() {
    let rig = rig(
        ScriptedEngine::new().with_auto_manifest(true),
        VirtualSink::new(),
    );
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    rig.sink.feed(1.5);

    tokio::time::sleep(Duration::from_millis(1010)).await;
    let tunings: Vec<f64> = rig
        .engine
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            EngineCall::ApplyTuning(tuning) => Some(tuning.max_buffer_length_secs),
            _ => None,
        })
        .collect();
    assert_eq!(tunings, vec![35.0]);
    assert_eq!(rig.handle.phase(), Phase::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_and_controls_auto_hide() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    assert!(rig.handle.state().show_controls);

    rig.sink.feed(120.0);
    rig.sink.advance(65.0);
    tokio::time::sleep(Duration::from_millis(1010)).await;
    assert_eq!(rig.handle.state().elapsed_time, "01:05");

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(!rig.handle.state().show_controls);

    rig.handle.toggle_fullscreen().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = rig.handle.state();
    assert!(state.show_controls);
    assert!(state.is_fullscreen);
    assert!(rig.sink.is_fullscreen());
}

#[tokio::test(start_paused = true)]
async fn test_volume_commands_reach_sink() {
    let rig = default_rig();
    rig.handle.set_volume(0).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.sink.volume(), (0.0, true));
    assert!(rig.handle.state().is_muted);

    rig.handle.set_volume(55).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.sink.volume(), (0.55, false));
    assert!(!rig.handle.state().is_muted);
}

#[tokio::test(start_paused = true)]
async fn test_native_decoder_binds_sink_directly() {
    let rig = rig(
        ScriptedEngine::new().with_supported(false),
        VirtualSink::new().with_native_hls(true),
    );
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    assert_eq!(rig.sink.source().as_deref(), Some("A"));
    assert!(rig.engine.attached_urls().is_empty());

    rig.sink.emit(EngineEvent::other("MEDIA_ERR_SRC_NOT_SUPPORTED"));
    wait_for_phase(&rig.handle, Phase::Playing).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(rig.sink.source().as_deref(), Some("B"));
}

#[tokio::test(start_paused = true)]
async fn test_open_resolves_through_source() {
    let rig = default_rig();
    let err = rig
        .handle
        .open(ChannelRequest::new("0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlayerError::NotFound { .. }));
    assert_eq!(rig.handle.phase(), Phase::Idle);

    rig.handle.open(ChannelRequest::new("7112")).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;
    assert_eq!(rig.engine.attached_urls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_descriptor_is_reported_to_caller() {
    let rig = default_rig();
    let err = rig
        .handle
        .start(StreamDescriptor::new("7112", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, PlayerError::InvalidDescriptor { .. }));
    assert_eq!(rig.handle.phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down() {
    let rig = default_rig();
    rig.handle.start(descriptor()).await.unwrap();
    wait_for_phase(&rig.handle, Phase::Playing).await;

    rig.handle.shutdown();
    rig.task.await.unwrap();
    assert!(rig.engine.calls().contains(&EngineCall::Detach));
    assert!(rig.sink.is_paused());
    assert!(matches!(
        rig.handle.start(descriptor()).await,
        Err(PlayerError::DriverClosed)
    ));
}
