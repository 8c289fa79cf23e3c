//! Wire events for the realtime-audio LLM backend.
//!
//! Frames are JSON text tagged by a `type` field in both directions. Server
//! frames decode through a representation enum with a lossless fallback, so
//! an unrecognized or malformed frame becomes [`ServerEvent::Unknown`]
//! instead of an error.

use crate::error::BackendApiError;
use crate::tools::ToolDeclaration;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Server-side turn-detection settings sent in `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u64>,
}

/// Tool declaration in this backend's flat function format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

impl From<ToolDeclaration> for FunctionDecl {
    fn from(decl: ToolDeclaration) -> Self {
        Self {
            kind: "function".to_string(),
            name: decl.name,
            description: Some(decl.description),
            parameters: decl.parameters,
        }
    }
}

/// Partial session configuration carried by `session.update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionDecl>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<u32>,
}

/// Conversation items this pipeline creates; only tool output survives the
/// capability model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: Box<SessionPatch> },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {},
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {},
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate {},
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    #[serde(rename = "output_audio_buffer.clear")]
    OutputAudioBufferClear {},
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Error {
        event_id: Option<String>,
        error: BackendApiError,
    },
    SessionCreated {
        event_id: Option<String>,
        session: Value,
    },
    SessionUpdated {
        event_id: Option<String>,
        session: Value,
    },
    SpeechStarted {
        event_id: Option<String>,
        audio_start_ms: Option<u64>,
    },
    SpeechStopped {
        event_id: Option<String>,
        audio_end_ms: Option<u64>,
    },
    InputTranscriptDelta {
        event_id: Option<String>,
        delta: String,
    },
    InputTranscriptCompleted {
        event_id: Option<String>,
        transcript: String,
    },
    ResponseCreated {
        event_id: Option<String>,
        response_id: Option<String>,
    },
    ResponseDone {
        event_id: Option<String>,
        response_id: Option<String>,
    },
    AudioDelta {
        event_id: Option<String>,
        delta: String,
    },
    AudioDone {
        event_id: Option<String>,
    },
    AudioTranscriptDelta {
        event_id: Option<String>,
        delta: String,
    },
    AudioTranscriptDone {
        event_id: Option<String>,
        transcript: String,
    },
    TextDelta {
        event_id: Option<String>,
        delta: String,
    },
    TextDone {
        event_id: Option<String>,
        text: String,
    },
    FunctionCallArgumentsDone {
        event_id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    Unknown(Value),
}

/// Loose payload carrying only the response id; the rest of the response
/// object is not consumed by the pipeline.
#[derive(Debug, Clone, Deserialize)]
struct ResponseRef {
    id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ServerEventRepr {
    #[serde(rename = "error")]
    Error {
        event_id: Option<String>,
        error: BackendApiError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        event_id: Option<String>,
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        event_id: Option<String>,
        session: Value,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        event_id: Option<String>,
        audio_start_ms: Option<u64>,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        event_id: Option<String>,
        audio_end_ms: Option<u64>,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta {
        event_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        event_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        event_id: Option<String>,
        response: ResponseRef,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        event_id: Option<String>,
        response: ResponseRef,
    },
    #[serde(rename = "response.output_audio.delta")]
    AudioDelta {
        event_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.output_audio.done")]
    AudioDone { event_id: Option<String> },
    #[serde(rename = "response.output_audio_transcript.delta")]
    AudioTranscriptDelta {
        event_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.output_audio_transcript.done")]
    AudioTranscriptDone {
        event_id: Option<String>,
        transcript: String,
    },
    #[serde(rename = "response.output_text.delta")]
    TextDelta {
        event_id: Option<String>,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    TextDone {
        event_id: Option<String>,
        text: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        event_id: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
}

impl From<ServerEventRepr> for ServerEvent {
    fn from(repr: ServerEventRepr) -> Self {
        match repr {
            ServerEventRepr::Error { event_id, error } => Self::Error { event_id, error },
            ServerEventRepr::SessionCreated { event_id, session } => {
                Self::SessionCreated { event_id, session }
            }
            ServerEventRepr::SessionUpdated { event_id, session } => {
                Self::SessionUpdated { event_id, session }
            }
            ServerEventRepr::SpeechStarted { event_id, audio_start_ms } => {
                Self::SpeechStarted { event_id, audio_start_ms }
            }
            ServerEventRepr::SpeechStopped { event_id, audio_end_ms } => {
                Self::SpeechStopped { event_id, audio_end_ms }
            }
            ServerEventRepr::InputTranscriptDelta { event_id, delta } => {
                Self::InputTranscriptDelta { event_id, delta }
            }
            ServerEventRepr::InputTranscriptCompleted { event_id, transcript } => {
                Self::InputTranscriptCompleted { event_id, transcript }
            }
            ServerEventRepr::ResponseCreated { event_id, response } => Self::ResponseCreated {
                event_id,
                response_id: response.id,
            },
            ServerEventRepr::ResponseDone { event_id, response } => Self::ResponseDone {
                event_id,
                response_id: response.id,
            },
            ServerEventRepr::AudioDelta { event_id, delta } => {
                Self::AudioDelta { event_id, delta }
            }
            ServerEventRepr::AudioDone { event_id } => Self::AudioDone { event_id },
            ServerEventRepr::AudioTranscriptDelta { event_id, delta } => {
                Self::AudioTranscriptDelta { event_id, delta }
            }
            ServerEventRepr::AudioTranscriptDone { event_id, transcript } => {
                Self::AudioTranscriptDone { event_id, transcript }
            }
            ServerEventRepr::TextDelta { event_id, delta } => {
                Self::TextDelta { event_id, delta }
            }
            ServerEventRepr::TextDone { event_id, text } => Self::TextDone { event_id, text },
            ServerEventRepr::FunctionCallArgumentsDone {
                event_id,
                call_id,
                name,
                arguments,
            } => Self::FunctionCallArgumentsDone {
                event_id,
                call_id,
                name,
                arguments,
            },
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
                tracing::debug!("unrecognized realtime server event: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

impl ServerEvent {
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Error { event_id, .. }
            | Self::SessionCreated { event_id, .. }
            | Self::SessionUpdated { event_id, .. }
            | Self::SpeechStarted { event_id, .. }
            | Self::SpeechStopped { event_id, .. }
            | Self::InputTranscriptDelta { event_id, .. }
            | Self::InputTranscriptCompleted { event_id, .. }
            | Self::ResponseCreated { event_id, .. }
            | Self::ResponseDone { event_id, .. }
            | Self::AudioDelta { event_id, .. }
            | Self::AudioDone { event_id }
            | Self::AudioTranscriptDelta { event_id, .. }
            | Self::AudioTranscriptDone { event_id, .. }
            | Self::TextDelta { event_id, .. }
            | Self::TextDone { event_id, .. }
            | Self::FunctionCallArgumentsDone { event_id, .. } => event_id.as_deref(),
            Self::Unknown(value) => value.get("event_id").and_then(Value::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_delta_decodes() {
        let frame = r#"{"type":"response.output_audio.delta","event_id":"evt_1","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"delta":"AAEC"}"#;
        let event: ServerEvent = serde_json::from_str(frame).unwrap();
        match event {
            ServerEvent::AudioDelta { delta, .. } => assert_eq!(delta, "AAEC"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_frame_becomes_unknown() {
        let frame = r#"{"type":"conversation.item.added","event_id":"evt_2","item":{}}"#;
        let event: ServerEvent = serde_json::from_str(frame).unwrap();
        assert!(matches!(event, ServerEvent::Unknown(_)));
        assert_eq!(event.event_id(), Some("evt_2"));
    }

    #[test]
    fn client_event_serializes_with_type_tag() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "AQID".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AQID");
    }
}
