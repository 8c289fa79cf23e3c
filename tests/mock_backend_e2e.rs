//! End-to-end pipeline scenario against a scripted in-process backend:
//! stream two seconds of synthetic PCM16 in 100 ms chunks, then the backend
//! detects end of speech, echoes one audio delta, and completes the turn.

mod common;

use common::{session_created_frame, MockConnector};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voicewire::{
    Backend, BackendRegistry, PipelineConfig, RealtimeAdapter, VadConfig, VoicePipeline,
    WireConnector,
};

const CHUNKS: usize = 20;

#[derive(Default)]
struct Observed {
    speech_ends: Mutex<u32>,
    audio_out: Mutex<Vec<Vec<u8>>>,
}

fn spawn_mock_backend(mut handle: common::MockServerHandle) {
    tokio::spawn(async move {
        let mut appends = 0usize;
        while let Some(frame) = handle.from_client.recv().await {
            let value: Value = match serde_json::from_str(&frame) {
                Ok(value) => value,
                Err(_) => continue,
            };
            match value["type"].as_str() {
                Some("session.update") => {
                    let _ = handle.to_client.send(session_created_frame());
                }
                Some("input_audio_buffer.append") => {
                    appends += 1;
                    if appends == CHUNKS {
                        let _ = handle.to_client.send(
                            json!({
                                "type": "input_audio_buffer.speech_stopped",
                                "event_id": "evt_ss",
                                "audio_end_ms": 2000,
                                "item_id": "item_1"
                            })
                            .to_string(),
                        );
                        let _ = handle.to_client.send(
                            json!({
                                "type": "response.output_audio.delta",
                                "event_id": "evt_ad",
                                "response_id": "resp_1",
                                "delta": "AQIDBA=="
                            })
                            .to_string(),
                        );
                        let _ = handle.to_client.send(
                            json!({
                                "type": "response.done",
                                "event_id": "evt_rd",
                                "response": {"id": "resp_1"}
                            })
                            .to_string(),
                        );
                    }
                }
                _ => {}
            }
        }
    });
}

#[tokio::test]
async fn one_turn_round_trip_reports_events_and_latency() {
    let (connector, handle) = MockConnector::new();
    let connector: Arc<dyn WireConnector> = connector;
    let mut registry = BackendRegistry::new();
    registry.register(Backend::OpenAiRealtime, move |ctx| {
        Box::new(RealtimeAdapter::with_connector(ctx, Arc::clone(&connector)))
    });

    let config = PipelineConfig::for_backend(Backend::OpenAiRealtime, "sk-test")
        .with_vad(VadConfig {
            silence_duration: Duration::from_millis(500),
            ..VadConfig::default()
        })
        .with_chunk_duration(Duration::from_millis(100));
    let pipeline = VoicePipeline::with_registry(config, &registry).unwrap();

    let observed = Arc::new(Observed::default());
    {
        let observed = Arc::clone(&observed);
        pipeline.on_speech_end(move || {
            *observed.speech_ends.lock().unwrap() += 1;
        });
    }
    {
        let observed = Arc::clone(&observed);
        pipeline.on_audio_out(move |pcm| {
            observed.audio_out.lock().unwrap().push(pcm.to_vec());
        });
    }

    spawn_mock_backend(handle);
    pipeline.start().await.unwrap();

    // Two seconds of synthetic speech in 100 ms chunks (4800 bytes of
    // PCM16 at 24 kHz each), then silence: the mock VAD closes the turn
    // after the final chunk.
    let chunk = vec![0x55u8; 4800];
    for _ in 0..CHUNKS {
        pipeline.send_audio(&chunk).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while pipeline.average_metrics().audio_chunks_out == 0
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(*observed.speech_ends.lock().unwrap(), 1, "exactly one speech end");
    let audio = observed.audio_out.lock().unwrap();
    assert_eq!(audio.len(), 1, "exactly one audio-out callback");
    assert_eq!(audio[0], vec![1u8, 2, 3, 4], "decoded payload intact");

    let turn = pipeline.average_metrics();
    assert!(turn.pipeline_latency > Duration::ZERO);
    assert!(turn.total_latency >= turn.pipeline_latency);
    assert_eq!(turn.audio_chunks_in, CHUNKS as u64);
    assert_eq!(turn.audio_chunks_out, 1);

    // The turn was archived and the live metrics reset for the next turn.
    assert_eq!(pipeline.metrics().audio_chunks_in, 0);

    pipeline.stop().await.unwrap();
}
