//! Adapter for the conversational-agent backend.
//!
//! Connecting is a two-step: a REST call exchanges the agent id for a
//! pre-signed socket URL, then the socket handshake runs against that URL.
//! The server opens with `conversation_initiation_metadata`, which marks
//! readiness. Application-level pings must be answered with a pong carrying
//! the same event id.
//!
//! The wire has no turn-complete frame; the previous agent turn is archived
//! when the next user utterance (or an interruption) arrives.

use crate::config::PipelineConfig;
use crate::pipeline::adapter::{
    close_connection, decode_pcm, encode_pcm, open_connection, AdapterContext, AdapterEvent,
    AdapterShared, Conn, ConnectionState, SharedWriter, VoiceAdapter,
};
use crate::protocol::convai::{
    AgentOverride, ConversationConfigOverride, OutboundEvent, PromptOverride, ServerEvent,
    TtsOverride, UserAudioChunk,
};
use crate::tools::{ToolInvocation, ToolResultSink};
use crate::transport::rest::AgentRestClient;
use crate::transport::wire::WireConnector;
use crate::transport::ws;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ConvaiAdapter {
    ctx: AdapterContext,
    shared: AdapterShared,
    connector: Arc<dyn WireConnector>,
    conn: Mutex<Option<Conn>>,
}

impl ConvaiAdapter {
    #[must_use]
    pub fn new(ctx: AdapterContext) -> Self {
        Self::with_connector(ctx, Arc::new(ConvaiConnector))
    }

    /// Construct with a custom connector; the seam used by tests.
    #[must_use]
    pub fn with_connector(ctx: AdapterContext, connector: Arc<dyn WireConnector>) -> Self {
        let shared = AdapterShared::new(&ctx);
        Self {
            ctx,
            shared,
            connector,
            conn: Mutex::new(None),
        }
    }

    async fn writer(&self) -> Result<SharedWriter> {
        let conn = self.conn.lock().await;
        conn.as_ref()
            .map(|c| Arc::clone(&c.writer))
            .ok_or(Error::NotConnected)
    }
}

struct ConvaiConnector;

#[async_trait]
impl WireConnector for ConvaiConnector {
    async fn connect(
        &self,
        config: &PipelineConfig,
    ) -> Result<(
        Box<dyn crate::transport::wire::WireTx>,
        Box<dyn crate::transport::wire::WireRx>,
    )> {
        let agent_id = config
            .agent_id
            .as_deref()
            .ok_or_else(|| Error::Config("agent_id is required".to_string()))?;
        let rest = AgentRestClient::new(&config.api_key)?;
        let signed_url = rest.get_signed_url(agent_id).await?;
        let stream = ws::connect_signed(&signed_url).await?;
        Ok(ws::split(stream))
    }
}

fn initiation_message(config: &PipelineConfig) -> OutboundEvent {
    let agent = config.system_prompt.as_ref().map(|prompt| AgentOverride {
        prompt: Some(PromptOverride {
            prompt: prompt.clone(),
        }),
        language: None,
    });
    let tts_override = {
        let voice_id = config.voice.clone();
        let speed = (config.speech_rate - 1.0).abs() > f32::EPSILON;
        (voice_id.is_some() || speed).then(|| TtsOverride {
            voice_id,
            speed: speed.then_some(config.speech_rate),
        })
    };
    let conversation_config_override = (agent.is_some() || tts_override.is_some()).then(|| {
        ConversationConfigOverride {
            agent,
            tts: tts_override,
        }
    });
    OutboundEvent::ConversationInit {
        conversation_config_override,
    }
}

fn decode(text: &str) -> Vec<AdapterEvent> {
    let Ok(event) = serde_json::from_str::<ServerEvent>(text) else {
        tracing::debug!("skipping malformed frame");
        return vec![AdapterEvent::Ignored];
    };
    match event {
        ServerEvent::ConversationInitiationMetadata(meta) => {
            tracing::info!(conversation_id = %meta.conversation_id, "conversation initiated");
            vec![AdapterEvent::SessionReady]
        }
        ServerEvent::Audio(audio) => decode_pcm(&audio.audio_base_64).map_or_else(
            || {
                tracing::warn!("dropping audio event with corrupt base64");
                vec![AdapterEvent::Ignored]
            },
            |pcm| vec![AdapterEvent::AudioOut(pcm)],
        ),
        ServerEvent::UserTranscript(event) => vec![
            AdapterEvent::TurnComplete,
            AdapterEvent::SpeechStopped,
            AdapterEvent::Transcript {
                text: event.user_transcript,
                is_final: true,
            },
        ],
        ServerEvent::AgentResponse(event) => vec![AdapterEvent::ResponseText {
            text: event.agent_response,
            is_final: true,
        }],
        ServerEvent::AgentResponseCorrection(_) | ServerEvent::VadScore(_) => {
            vec![AdapterEvent::Ignored]
        }
        ServerEvent::Interruption(_) => {
            vec![AdapterEvent::Interrupted, AdapterEvent::TurnComplete]
        }
        ServerEvent::Ping(ping) => {
            let pong = OutboundEvent::Pong {
                event_id: ping.event_id,
            };
            serde_json::to_string(&pong).map_or_else(
                |_| vec![AdapterEvent::Ignored],
                |payload| vec![AdapterEvent::Reply(payload)],
            )
        }
        ServerEvent::ClientToolCall(call) => vec![AdapterEvent::ToolCall(ToolInvocation {
            call_id: call.tool_call_id,
            name: call.tool_name,
            arguments: call.parameters,
        })],
        ServerEvent::Unknown(value) => {
            tracing::debug!(
                kind = value.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "ignoring unknown server event"
            );
            vec![AdapterEvent::Ignored]
        }
    }
}

struct ConvaiSink {
    writer: SharedWriter,
}

#[async_trait]
impl ToolResultSink for ConvaiSink {
    async fn submit_tool_result(
        &self,
        call_id: &str,
        output: &str,
        is_error: bool,
    ) -> Result<()> {
        let frame = serde_json::to_string(&OutboundEvent::ClientToolResult {
            tool_call_id: call_id.to_string(),
            result: output.to_string(),
            is_error,
        })?;
        self.writer.lock().await.send_text(frame).await
    }

    async fn continue_generation(&self) -> Result<()> {
        // The agent resumes once tool results arrive.
        Ok(())
    }
}

#[async_trait]
impl VoiceAdapter for ConvaiAdapter {
    async fn start(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let config = self.ctx.config_snapshot();
        let init = serde_json::to_string(&initiation_message(&config))?;
        open_connection(
            &self.connector,
            &self.shared,
            &mut slot,
            &config,
            vec![init],
            |writer| Arc::new(ConvaiSink { writer }),
            decode,
        )
        .await
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        close_connection(&self.shared, &mut slot).await
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        if pcm.is_empty() {
            return Ok(());
        }
        let frame = serde_json::to_string(&UserAudioChunk {
            user_audio_chunk: encode_pcm(pcm)?,
        })?;
        let writer = self.writer().await?;
        self.shared.metrics.mark_send_start();
        let result = writer.lock().await.send_text(frame).await;
        self.shared.metrics.mark_send_end();
        result?;
        self.shared.metrics.mark_pipeline_start();
        self.shared.metrics.increment_audio_in();
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }
        // The agent interrupts itself when new audio arrives during
        // playback; there is no client-side cancel frame.
        Ok(())
    }

    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        let sink = ConvaiSink {
            writer: self.writer().await?,
        };
        sink.submit_tool_result(call_id, output, false).await?;
        sink.continue_generation().await
    }

    async fn update_session(&self, _config: &PipelineConfig) -> Result<bool> {
        // Overrides are only honored in the initiation message.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn ping_decodes_to_matching_pong_reply() {
        let frame = r#"{"type":"ping","ping_event":{"event_id":7,"ping_ms":null}}"#;
        let events = decode(frame);
        match &events[0] {
            AdapterEvent::Reply(payload) => {
                let json: Value = serde_json::from_str(payload).unwrap();
                assert_eq!(json["type"], "pong");
                assert_eq!(json["event_id"], 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn user_transcript_closes_previous_turn() {
        let frame = r#"{"type":"user_transcript","user_transcription_event":{"user_transcript":"hello"}}"#;
        let events = decode(frame);
        assert!(matches!(events[0], AdapterEvent::TurnComplete));
        assert!(matches!(events[1], AdapterEvent::SpeechStopped));
        assert!(
            matches!(&events[2], AdapterEvent::Transcript { text, is_final: true } if text == "hello")
        );
    }

    #[test]
    fn initiation_message_carries_overrides() {
        let config = PipelineConfig::for_backend(
            crate::config::Backend::ElevenLabsAgent,
            "xi-key",
        )
        .with_agent_id("agent_1")
        .with_system_prompt("stay friendly")
        .with_voice("piper");
        let json = serde_json::to_value(initiation_message(&config)).unwrap();
        assert_eq!(json["type"], "conversation_initiation_client_data");
        assert_eq!(
            json["conversation_config_override"]["agent"]["prompt"]["prompt"],
            "stay friendly"
        );
        assert_eq!(
            json["conversation_config_override"]["tts"]["voice_id"],
            "piper"
        );
    }

    #[test]
    fn malformed_json_is_skipped() {
        let events = decode("{not json");
        assert!(matches!(events[0], AdapterEvent::Ignored));
    }
}
