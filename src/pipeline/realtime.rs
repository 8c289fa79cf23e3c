//! Adapter for the realtime-audio LLM backend.
//!
//! Session setup is a `session.update` sent right after the socket opens;
//! the backend answers with `session.created`/`session.updated`, which marks
//! readiness. Interruption is explicit: the active response is cancelled and
//! the output audio buffer cleared. Tool results travel as
//! `function_call_output` conversation items followed by a `response.create`
//! continue signal.

use crate::config::{PipelineConfig, VadMode};
use crate::pipeline::adapter::{
    close_connection, decode_pcm, encode_pcm, open_connection, AdapterContext, AdapterEvent,
    AdapterShared, Conn, ConnectionState, SharedWriter, VoiceAdapter,
};
use crate::protocol::realtime::{
    ClientEvent, ConversationItem, FunctionDecl, ServerEvent, SessionPatch, TurnDetection,
};
use crate::tools::{ToolInvocation, ToolRegistry, ToolResultSink};
use crate::transport::wire::WireConnector;
use crate::transport::ws;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;

pub struct RealtimeAdapter {
    ctx: AdapterContext,
    shared: AdapterShared,
    connector: Arc<dyn WireConnector>,
    conn: Mutex<Option<Conn>>,
    active_response: Arc<StdMutex<Option<String>>>,
}

impl RealtimeAdapter {
    #[must_use]
    pub fn new(ctx: AdapterContext) -> Self {
        Self::with_connector(ctx, Arc::new(RealtimeConnector))
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
            active_response: Arc::new(StdMutex::new(None)),
        }
    }

    async fn writer(&self) -> Result<SharedWriter> {
        let conn = self.conn.lock().await;
        conn.as_ref()
            .map(|c| Arc::clone(&c.writer))
            .ok_or(Error::NotConnected)
    }
}

struct RealtimeConnector;

#[async_trait]
impl WireConnector for RealtimeConnector {
    async fn connect(
        &self,
        config: &PipelineConfig,
    ) -> Result<(
        Box<dyn crate::transport::wire::WireTx>,
        Box<dyn crate::transport::wire::WireRx>,
    )> {
        let stream = ws::connect_realtime(&config.api_key, &config.model).await?;
        Ok(ws::split(stream))
    }
}

fn session_patch(config: &PipelineConfig, registry: &ToolRegistry) -> SessionPatch {
    let turn_detection = match config.vad.mode {
        VadMode::ServerVad => Some(TurnDetection {
            kind: "server_vad".to_string(),
            threshold: Some(config.vad.threshold),
            prefix_padding_ms: Some(config.vad.prefix_padding.as_millis() as u64),
            silence_duration_ms: Some(config.vad.silence_duration.as_millis() as u64),
        }),
        VadMode::SemanticVad => Some(TurnDetection {
            kind: "semantic_vad".to_string(),
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }),
        VadMode::Disabled => None,
    };
    let tools = registry
        .declarations()
        .into_iter()
        .map(FunctionDecl::from)
        .collect::<Vec<_>>();
    SessionPatch {
        instructions: config.system_prompt.clone(),
        voice: config.voice.clone(),
        input_audio_format: Some("pcm16".to_string()),
        output_audio_format: Some("pcm16".to_string()),
        turn_detection,
        tools: (!tools.is_empty()).then_some(tools),
        temperature: Some(config.temperature),
        max_response_output_tokens: config.max_response_tokens,
    }
}

fn make_decoder(
    active_response: Arc<StdMutex<Option<String>>>,
) -> impl Fn(&str) -> Vec<AdapterEvent> + Clone + Send + 'static {
    move |text: &str| {
        let Ok(event) = serde_json::from_str::<ServerEvent>(text) else {
            tracing::debug!("skipping malformed frame");
            return vec![AdapterEvent::Ignored];
        };
        vec![map_event(event, &active_response)]
    }
}

fn map_event(
    event: ServerEvent,
    active_response: &Arc<StdMutex<Option<String>>>,
) -> AdapterEvent {
    match event {
        ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
            AdapterEvent::SessionReady
        }
        ServerEvent::SpeechStarted { .. } => AdapterEvent::SpeechStarted,
        ServerEvent::SpeechStopped { .. } => AdapterEvent::SpeechStopped,
        ServerEvent::InputTranscriptDelta { delta, .. } => AdapterEvent::Transcript {
            text: delta,
            is_final: false,
        },
        ServerEvent::InputTranscriptCompleted { transcript, .. } => AdapterEvent::Transcript {
            text: transcript,
            is_final: true,
        },
        ServerEvent::ResponseCreated { response_id, .. } => {
            *active_response.lock().unwrap_or_else(PoisonError::into_inner) = response_id;
            AdapterEvent::Ignored
        }
        ServerEvent::ResponseDone { .. } => {
            active_response
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            AdapterEvent::TurnComplete
        }
        ServerEvent::AudioDelta { delta, .. } => decode_pcm(&delta).map_or_else(
            || {
                tracing::warn!("dropping audio delta with corrupt base64");
                AdapterEvent::Ignored
            },
            AdapterEvent::AudioOut,
        ),
        ServerEvent::AudioDone { .. } => AdapterEvent::Ignored,
        ServerEvent::AudioTranscriptDelta { delta, .. } => AdapterEvent::ResponseText {
            text: delta,
            is_final: false,
        },
        ServerEvent::AudioTranscriptDone { transcript, .. } => AdapterEvent::ResponseText {
            text: transcript,
            is_final: true,
        },
        ServerEvent::TextDelta { delta, .. } => AdapterEvent::ResponseText {
            text: delta,
            is_final: false,
        },
        ServerEvent::TextDone { text, .. } => AdapterEvent::ResponseText {
            text,
            is_final: true,
        },
        ServerEvent::FunctionCallArgumentsDone {
            call_id,
            name,
            arguments,
            ..
        } => {
            let arguments =
                serde_json::from_str(&arguments).unwrap_or(Value::String(arguments));
            AdapterEvent::ToolCall(ToolInvocation {
                call_id,
                name,
                arguments,
            })
        }
        ServerEvent::Error { error, .. } => AdapterEvent::BackendError(error),
        ServerEvent::Unknown(value) => {
            tracing::debug!(
                kind = value.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "ignoring unknown server event"
            );
            AdapterEvent::Ignored
        }
    }
}

struct RealtimeSink {
    writer: SharedWriter,
}

impl RealtimeSink {
    async fn send(&self, event: &ClientEvent) -> Result<()> {
        let frame = serde_json::to_string(event)?;
        self.writer.lock().await.send_text(frame).await
    }
}

#[async_trait]
impl ToolResultSink for RealtimeSink {
    async fn submit_tool_result(
        &self,
        call_id: &str,
        output: &str,
        _is_error: bool,
    ) -> Result<()> {
        self.send(&ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.to_string(),
            },
        })
        .await
    }

    async fn continue_generation(&self) -> Result<()> {
        self.send(&ClientEvent::ResponseCreate {}).await
    }
}

#[async_trait]
impl VoiceAdapter for RealtimeAdapter {
    async fn start(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let config = self.ctx.config_snapshot();
        let patch = session_patch(&config, &self.ctx.registry);
        let setup = serde_json::to_string(&ClientEvent::SessionUpdate {
            session: Box::new(patch),
        })?;
        open_connection(
            &self.connector,
            &self.shared,
            &mut slot,
            &config,
            vec![setup],
            |writer| Arc::new(RealtimeSink { writer }),
            make_decoder(Arc::clone(&self.active_response)),
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
        let frame = serde_json::to_string(&ClientEvent::InputAudioBufferAppend {
            audio: encode_pcm(pcm)?,
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
        let response_id = self
            .active_response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let writer = self.writer().await?;
        let sink = RealtimeSink { writer };
        sink.send(&ClientEvent::OutputAudioBufferClear {}).await?;
        sink.send(&ClientEvent::ResponseCancel { response_id }).await
    }

    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        let sink = RealtimeSink {
            writer: self.writer().await?,
        };
        sink.submit_tool_result(call_id, output, false).await?;
        sink.continue_generation().await
    }

    async fn update_session(&self, config: &PipelineConfig) -> Result<bool> {
        if self.shared.state() != ConnectionState::Ready {
            return Ok(false);
        }
        let patch = session_patch(config, &self.ctx.registry);
        let sink = RealtimeSink {
            writer: self.writer().await?,
        };
        sink.send(&ClientEvent::SessionUpdate {
            session: Box::new(patch),
        })
        .await?;
        Ok(true)
    }
}
