//! Wire events for the conversational-agent backend.
//!
//! Server frames are JSON tagged by a `type` field; the client sends plain
//! audio-chunk objects plus a small set of typed messages. Application-level
//! pings carry an event id that must be echoed back in the pong.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ── Client frames ────────────────────────────────────────────────

/// Outbound audio; the only untyped client frame.
#[derive(Debug, Clone, Serialize)]
pub struct UserAudioChunk {
    pub user_audio_chunk: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptOverride {
    pub prompt: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<PromptOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TtsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationConfigOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    #[serde(rename = "conversation_initiation_client_data")]
    ConversationInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_config_override: Option<ConversationConfigOverride>,
    },
    #[serde(rename = "pong")]
    Pong { event_id: u64 },
    #[serde(rename = "client_tool_result")]
    ClientToolResult {
        tool_call_id: String,
        result: String,
        is_error: bool,
    },
}

// ── Server frames ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataEvent {
    pub conversation_id: String,
    pub agent_output_audio_format: Option<String>,
    pub user_input_audio_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioEvent {
    pub audio_base_64: String,
    pub event_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserTranscriptionEvent {
    pub user_transcript: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentResponseEvent {
    pub agent_response: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VadScoreEvent {
    pub vad_score: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    pub event_id: u64,
    pub ping_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientToolCall {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ConversationInitiationMetadata(MetadataEvent),
    Audio(AudioEvent),
    UserTranscript(UserTranscriptionEvent),
    AgentResponse(AgentResponseEvent),
    AgentResponseCorrection(Value),
    VadScore(VadScoreEvent),
    Interruption(Value),
    Ping(PingEvent),
    ClientToolCall(ClientToolCall),
    Unknown(Value),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "conversation_initiation_metadata")]
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: MetadataEvent,
    },
    #[serde(rename = "audio")]
    Audio { audio_event: AudioEvent },
    #[serde(rename = "user_transcript")]
    UserTranscript {
        user_transcription_event: UserTranscriptionEvent,
    },
    #[serde(rename = "agent_response")]
    AgentResponse {
        agent_response_event: AgentResponseEvent,
    },
    #[serde(rename = "agent_response_correction")]
    AgentResponseCorrection {
        agent_response_correction_event: Value,
    },
    #[serde(rename = "vad_score")]
    VadScore { vad_score_event: VadScoreEvent },
    #[serde(rename = "interruption")]
    Interruption { interruption_event: Value },
    #[serde(rename = "ping")]
    Ping { ping_event: PingEvent },
    #[serde(rename = "client_tool_call")]
    ClientToolCall { client_tool_call: ClientToolCall },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::ConversationInitiationMetadata {
                conversation_initiation_metadata_event,
            } => Self::ConversationInitiationMetadata(conversation_initiation_metadata_event),
            ServerEventRepr::Audio { audio_event } => Self::Audio(audio_event),
            ServerEventRepr::UserTranscript {
                user_transcription_event,
            } => Self::UserTranscript(user_transcription_event),
            ServerEventRepr::AgentResponse {
                agent_response_event,
            } => Self::AgentResponse(agent_response_event),
            ServerEventRepr::AgentResponseCorrection {
                agent_response_correction_event,
            } => Self::AgentResponseCorrection(agent_response_correction_event),
            ServerEventRepr::VadScore { vad_score_event } => Self::VadScore(vad_score_event),
            ServerEventRepr::Interruption { interruption_event } => {
                Self::Interruption(interruption_event)
            }
            ServerEventRepr::Ping { ping_event } => Self::Ping(ping_event),
            ServerEventRepr::ClientToolCall { client_tool_call } => {
                Self::ClientToolCall(client_tool_call)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match ServerEventRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("unrecognized agent server event: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_decodes_with_event_id() {
        let frame = r#"{"type":"ping","ping_event":{"event_id":42,"ping_ms":10}}"#;
        let event: ServerEvent = serde_json::from_str(frame).unwrap();
        match event {
            ServerEvent::Ping(ping) => assert_eq!(ping.event_id, 42),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn pong_echoes_event_id() {
        let json = serde_json::to_value(OutboundEvent::Pong { event_id: 42 }).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["event_id"], 42);
    }

    #[test]
    fn tool_call_decodes() {
        let frame = r#"{"type":"client_tool_call","client_tool_call":{"tool_name":"get_time","tool_call_id":"tc_1","parameters":{"tz":"UTC"}}}"#;
        let event: ServerEvent = serde_json::from_str(frame).unwrap();
        match event {
            ServerEvent::ClientToolCall(call) => {
                assert_eq!(call.tool_name, "get_time");
                assert_eq!(call.parameters["tz"], "UTC");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_preserved() {
        let frame = r#"{"type":"internal_tentative_agent_response","x":1}"#;
        let event: ServerEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(event, ServerEvent::Unknown(_)));
    }
}
