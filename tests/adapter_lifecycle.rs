mod common;

use common::{session_created_frame, MockConnector};
use std::sync::Arc;
use std::time::Duration;
use voicewire::{
    Backend, BackendRegistry, ConnectionState, Error, PipelineConfig, RealtimeAdapter,
    VoicePipeline, WireConnector,
};

fn mock_pipeline() -> (VoicePipeline, common::MockServerHandle) {
    let (connector, handle) = MockConnector::new();
    let connector: Arc<dyn WireConnector> = connector;
    let mut registry = BackendRegistry::new();
    registry.register(Backend::OpenAiRealtime, move |ctx| {
        Box::new(RealtimeAdapter::with_connector(ctx, Arc::clone(&connector)))
    });
    let config = PipelineConfig::for_backend(Backend::OpenAiRealtime, "sk-test");
    let pipeline = VoicePipeline::with_registry(config, &registry).unwrap();
    (pipeline, handle)
}

#[tokio::test]
async fn send_audio_before_start_fails_with_not_connected() {
    let (pipeline, _handle) = mock_pipeline();
    for buffer in [&[][..], &[0u8; 1][..], &[0u8; 4096][..]] {
        let err = pipeline.send_audio(buffer).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected), "buffer len {}", buffer.len());
    }
}

#[tokio::test]
async fn start_twice_fails_and_stays_connected() {
    let (pipeline, handle) = mock_pipeline();
    handle.to_client.send(session_created_frame()).unwrap();

    pipeline.start().await.unwrap();
    assert!(pipeline.is_connected());
    assert_eq!(pipeline.state(), ConnectionState::Ready);

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected));
    assert!(pipeline.is_connected(), "first connection survives the failed start");
}

#[tokio::test]
async fn stop_is_idempotent_and_send_after_stop_fails() {
    let (pipeline, handle) = mock_pipeline();
    handle.to_client.send(session_created_frame()).unwrap();

    pipeline.start().await.unwrap();
    pipeline.stop().await.unwrap();
    assert!(!pipeline.is_connected());

    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), ConnectionState::Disconnected);

    let err = pipeline.send_audio(&[0u8; 320]).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let (pipeline, _handle) = mock_pipeline();
    pipeline.stop().await.unwrap();
    assert_eq!(pipeline.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn handshake_without_readiness_times_out_as_retryable() {
    let (connector, _handle) = MockConnector::new();
    let connector: Arc<dyn WireConnector> = connector;
    let mut registry = BackendRegistry::new();
    registry.register(Backend::OpenAiRealtime, move |ctx| {
        Box::new(RealtimeAdapter::with_connector(ctx, Arc::clone(&connector)))
    });
    let config = PipelineConfig::for_backend(Backend::OpenAiRealtime, "sk-test");
    let pipeline = VoicePipeline::with_registry(config, &registry).unwrap();

    // No session.created is ever sent; pause time so the 10s readiness
    // timeout elapses instantly.
    tokio::time::pause();
    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(err, Error::Handshake { retryable: true, .. }));
    assert_eq!(pipeline.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn send_audio_marks_send_and_pipeline_stages() {
    let (pipeline, mut handle) = mock_pipeline();
    handle.to_client.send(session_created_frame()).unwrap();
    pipeline.start().await.unwrap();

    // Drain the session.update the adapter sent during setup.
    let setup = handle.from_client.recv().await.unwrap();
    assert!(setup.contains("session.update"));

    pipeline.send_audio(&[1u8, 2, 3, 4]).await.unwrap();
    let frame = handle.from_client.recv().await.unwrap();
    assert!(frame.contains("input_audio_buffer.append"));

    let snapshot = pipeline.metrics();
    assert_eq!(snapshot.audio_chunks_in, 1);

    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn zero_length_buffer_while_connected_is_a_no_op() {
    let (pipeline, mut handle) = mock_pipeline();
    handle.to_client.send(session_created_frame()).unwrap();
    pipeline.start().await.unwrap();
    let _setup = handle.from_client.recv().await.unwrap();

    pipeline.send_audio(&[]).await.unwrap();
    assert_eq!(pipeline.metrics().audio_chunks_in, 0);

    pipeline.stop().await.unwrap();
    // Nothing but the close-time silence: no append frame was written.
    assert!(tokio::time::timeout(Duration::from_millis(50), handle.from_client.recv())
        .await
        .map_or(true, |frame| frame.is_none()));
}
