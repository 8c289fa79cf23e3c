//! Adapter for the native speech-to-speech backend.
//!
//! A single `setup` message goes out right after the socket opens and the
//! backend answers with `setupComplete`; only then is audio accepted. Server
//! VAD interrupts generation on its own when new speech arrives, so
//! `interrupt` has nothing to send. Tool calls arrive either as structured
//! `toolCall` frames or as restricted code expressions inside model-turn
//! parts; both normalize to the same [`ToolInvocation`] shape.

use crate::config::{PipelineConfig, VadMode, VadSensitivity};
use crate::pipeline::adapter::{
    close_connection, decode_pcm, encode_pcm, open_connection, AdapterContext, AdapterEvent,
    AdapterShared, Conn, ConnectionState, SharedWriter, VoiceAdapter,
};
use crate::protocol::gemini::{
    parse_code_call, pcm_mime_type, AutomaticActivityDetection, Blob, Content, FunctionCall,
    FunctionDeclaration, FunctionResponse, GenerationConfig, Part, PrebuiltVoiceConfig,
    RealtimeInput, RealtimeInputMessage, RealtimeInputConfig, ServerContent, ServerMessage,
    Setup, SetupMessage, SpeechConfig, ToolDeclGroup, ToolResponse, ToolResponseMessage,
    VoiceConfig,
};
use crate::tools::{ToolInvocation, ToolRegistry, ToolResultSink};
use crate::transport::wire::WireConnector;
use crate::transport::ws;
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;

/// Call ids seen but not yet answered, mapped to their tool names; the wire
/// format requires the name alongside the id when responding.
type PendingCalls = Arc<StdMutex<HashMap<String, String>>>;

pub struct GeminiAdapter {
    ctx: AdapterContext,
    shared: AdapterShared,
    connector: Arc<dyn WireConnector>,
    conn: Mutex<Option<Conn>>,
    pending_calls: PendingCalls,
}

impl GeminiAdapter {
    #[must_use]
    pub fn new(ctx: AdapterContext) -> Self {
        Self::with_connector(ctx, Arc::new(GeminiConnector))
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
            pending_calls: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    async fn writer(&self) -> Result<SharedWriter> {
        let conn = self.conn.lock().await;
        conn.as_ref()
            .map(|c| Arc::clone(&c.writer))
            .ok_or(Error::NotConnected)
    }
}

struct GeminiConnector;

#[async_trait]
impl WireConnector for GeminiConnector {
    async fn connect(
        &self,
        config: &PipelineConfig,
    ) -> Result<(
        Box<dyn crate::transport::wire::WireTx>,
        Box<dyn crate::transport::wire::WireRx>,
    )> {
        let stream = ws::connect_gemini(&config.api_key).await?;
        Ok(ws::split(stream))
    }
}

const fn start_sensitivity(s: VadSensitivity) -> &'static str {
    match s {
        VadSensitivity::High => "START_SENSITIVITY_HIGH",
        VadSensitivity::Low => "START_SENSITIVITY_LOW",
    }
}

const fn end_sensitivity(s: VadSensitivity) -> &'static str {
    match s {
        VadSensitivity::High => "END_SENSITIVITY_HIGH",
        VadSensitivity::Low => "END_SENSITIVITY_LOW",
    }
}

fn setup_message(config: &PipelineConfig, registry: &ToolRegistry) -> SetupMessage {
    let speech_config = config.voice.as_ref().map(|voice| SpeechConfig {
        voice_config: Some(VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: voice.clone(),
            },
        }),
    });
    let system_instruction = config.system_prompt.as_ref().map(|prompt| Content {
        parts: vec![Part {
            text: Some(prompt.clone()),
            ..Part::default()
        }],
        role: Some("system".to_string()),
    });
    let declarations: Vec<FunctionDeclaration> = registry
        .declarations()
        .into_iter()
        .map(|decl| FunctionDeclaration {
            name: decl.name,
            description: Some(decl.description),
            parameters: decl.parameters,
        })
        .collect();
    let vad = &config.vad;
    let automatic_activity_detection = Some(match vad.mode {
        VadMode::Disabled => AutomaticActivityDetection {
            disabled: Some(true),
            ..AutomaticActivityDetection::default()
        },
        VadMode::ServerVad | VadMode::SemanticVad => AutomaticActivityDetection {
            disabled: None,
            start_of_speech_sensitivity: Some(start_sensitivity(vad.start_sensitivity).to_string()),
            end_of_speech_sensitivity: Some(end_sensitivity(vad.end_sensitivity).to_string()),
            prefix_padding_ms: Some(vad.prefix_padding.as_millis() as u64),
            silence_duration_ms: Some(vad.silence_duration.as_millis() as u64),
        },
    });
    SetupMessage {
        setup: Setup {
            model: config.model.clone(),
            generation_config: Some(GenerationConfig {
                temperature: Some(config.temperature),
                max_output_tokens: config.max_response_tokens,
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config,
            }),
            system_instruction,
            tools: (!declarations.is_empty()).then(|| {
                vec![ToolDeclGroup {
                    function_declarations: declarations,
                }]
            }),
            realtime_input_config: Some(RealtimeInputConfig {
                automatic_activity_detection,
            }),
        },
    }
}

fn make_decoder(
    pending_calls: PendingCalls,
) -> impl Fn(&str) -> Vec<AdapterEvent> + Clone + Send + 'static {
    move |text: &str| {
        let Ok(message) = serde_json::from_str::<ServerMessage>(text) else {
            tracing::debug!("skipping malformed frame");
            return vec![AdapterEvent::Ignored];
        };
        map_message(message, &pending_calls)
    }
}

fn map_message(message: ServerMessage, pending_calls: &PendingCalls) -> Vec<AdapterEvent> {
    let mut events = Vec::new();
    if message.setup_complete.is_some() {
        events.push(AdapterEvent::SessionReady);
    }
    if let Some(content) = message.server_content {
        map_server_content(content, pending_calls, &mut events);
    }
    if let Some(tool_call) = message.tool_call {
        for call in tool_call.function_calls {
            events.push(tool_call_event(call, pending_calls));
        }
    }
    if message.go_away.is_some() {
        tracing::warn!("backend announced imminent disconnect");
    }
    if events.is_empty() {
        events.push(AdapterEvent::Ignored);
    }
    events
}

fn map_server_content(
    content: ServerContent,
    pending_calls: &PendingCalls,
    events: &mut Vec<AdapterEvent>,
) {
    if let Some(transcription) = content.input_transcription {
        if let Some(text) = transcription.text {
            events.push(AdapterEvent::Transcript {
                text,
                is_final: transcription.finished.unwrap_or(false),
            });
        }
    }
    if let Some(transcription) = content.output_transcription {
        if let Some(text) = transcription.text {
            events.push(AdapterEvent::ResponseText {
                text,
                is_final: transcription.finished.unwrap_or(false),
            });
        }
    }
    if content.interrupted == Some(true) {
        events.push(AdapterEvent::Interrupted);
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                match decode_pcm(&blob.data) {
                    Some(pcm) => events.push(AdapterEvent::AudioOut(pcm)),
                    None => tracing::warn!("dropping audio part with corrupt base64"),
                }
            }
            if let Some(text) = part.text {
                events.push(AdapterEvent::ResponseText {
                    text,
                    is_final: false,
                });
            }
            if let Some(code) = part.executable_code {
                match parse_code_call(&code.code) {
                    Some((name, arguments)) => {
                        // No wire call id exists for the textual encoding;
                        // the tool name doubles as the id.
                        pending_calls
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(name.clone(), name.clone());
                        events.push(AdapterEvent::ToolCall(ToolInvocation {
                            call_id: name.clone(),
                            name,
                            arguments,
                        }));
                    }
                    None => tracing::debug!("skipping unparseable code part"),
                }
            }
        }
    }
    if content.turn_complete == Some(true) {
        events.push(AdapterEvent::TurnComplete);
    }
}

fn tool_call_event(call: FunctionCall, pending_calls: &PendingCalls) -> AdapterEvent {
    let call_id = call.id.unwrap_or_else(|| call.name.clone());
    pending_calls
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(call_id.clone(), call.name.clone());
    AdapterEvent::ToolCall(ToolInvocation {
        call_id,
        name: call.name,
        arguments: call.args.unwrap_or(Value::Object(serde_json::Map::new())),
    })
}

struct GeminiSink {
    writer: SharedWriter,
    pending_calls: PendingCalls,
}

#[async_trait]
impl ToolResultSink for GeminiSink {
    async fn submit_tool_result(
        &self,
        call_id: &str,
        output: &str,
        is_error: bool,
    ) -> Result<()> {
        let Some(name) = self
            .pending_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(call_id)
        else {
            // Unknown or already-resolved id: a late result after an
            // interruption is a normal race, not worth failing the caller.
            tracing::warn!(%call_id, "ignoring tool result for unknown call id");
            return Ok(());
        };
        let key = if is_error { "error" } else { "output" };
        let message = ToolResponseMessage {
            tool_response: ToolResponse {
                function_responses: vec![FunctionResponse {
                    id: Some(call_id.to_string()),
                    name,
                    response: serde_json::json!({ key: output }),
                }],
            },
        };
        let frame = serde_json::to_string(&message)?;
        self.writer.lock().await.send_text(frame).await
    }

    async fn continue_generation(&self) -> Result<()> {
        // Generation resumes on its own once tool responses arrive.
        Ok(())
    }
}

#[async_trait]
impl VoiceAdapter for GeminiAdapter {
    async fn start(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        let config = self.ctx.config_snapshot();
        let setup = serde_json::to_string(&setup_message(&config, &self.ctx.registry))?;
        let pending_calls = Arc::clone(&self.pending_calls);
        open_connection(
            &self.connector,
            &self.shared,
            &mut slot,
            &config,
            vec![setup],
            |writer| {
                Arc::new(GeminiSink {
                    writer,
                    pending_calls: Arc::clone(&pending_calls),
                })
            },
            make_decoder(Arc::clone(&self.pending_calls)),
        )
        .await
    }

    async fn stop(&self) -> Result<()> {
        let mut slot = self.conn.lock().await;
        self.pending_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
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
        let sample_rate = self.ctx.config_snapshot().input_sample_rate;
        let message = RealtimeInputMessage {
            realtime_input: RealtimeInput {
                audio: Some(Blob {
                    mime_type: pcm_mime_type(sample_rate),
                    data: encode_pcm(pcm)?,
                }),
                audio_stream_end: None,
            },
        };
        let frame = serde_json::to_string(&message)?;
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
        // Server-side VAD cancels generation when new speech arrives;
        // nothing to send from this side.
        Ok(())
    }

    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        let sink = GeminiSink {
            writer: self.writer().await?,
            pending_calls: Arc::clone(&self.pending_calls),
        };
        sink.submit_tool_result(call_id, output, false).await?;
        sink.continue_generation().await
    }

    async fn update_session(&self, _config: &PipelineConfig) -> Result<bool> {
        // Session configuration is fixed at setup time for this backend.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    fn test_config() -> PipelineConfig {
        PipelineConfig::for_backend(Backend::GeminiLive, "key")
            .with_system_prompt("hi")
            .with_voice("Aoede")
    }

    #[test]
    fn setup_carries_vad_and_tools() {
        let registry = ToolRegistry::new();
        registry.register(crate::tools::ToolSpec::new(
            "get_time",
            "current time",
            serde_json::json!({"type": "object"}),
        ));
        let msg = setup_message(&test_config(), &registry);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json["setup"]["realtimeInputConfig"]["automaticActivityDetection"]
                ["silenceDurationMs"],
            500
        );
        assert_eq!(
            json["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "get_time"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
    }

    #[test]
    fn frame_with_audio_and_turn_complete_yields_both_events() {
        let pending = PendingCalls::default();
        let decode = make_decoder(pending);
        let frame = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"mimeType": "audio/pcm", "data": "AAEC"}}]
                },
                "turnComplete": true
            }
        })
        .to_string();
        let events = decode(&frame);
        assert!(matches!(events[0], AdapterEvent::AudioOut(_)));
        assert!(matches!(events[1], AdapterEvent::TurnComplete));
    }

    #[test]
    fn code_part_normalizes_to_tool_call() {
        let pending = PendingCalls::default();
        let decode = make_decoder(Arc::clone(&pending));
        let frame = serde_json::json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{"executableCode": {"language": "PYTHON",
                        "code": "default_api.get_weather(city='Oslo')"}}]
                }
            }
        })
        .to_string();
        let events = decode(&frame);
        match &events[0] {
            AdapterEvent::ToolCall(call) => {
                assert_eq!(call.name, "get_weather");
                assert_eq!(call.arguments["city"], "Oslo");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(pending.lock().unwrap().contains_key("get_weather"));
    }
}
