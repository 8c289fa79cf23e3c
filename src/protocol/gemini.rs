//! Wire messages for the native speech-to-speech backend.
//!
//! Frames are camelCase JSON. The client opens with a `setup` message and
//! must wait for `setupComplete` before streaming; server frames are structs
//! of optional sections rather than type-tagged, so decode is tolerant by
//! construction and anything unrecognized is preserved in the raw value.
//!
//! This backend additionally encodes some tool calls as restricted
//! Python-like call expressions inside executable-code parts; see
//! [`parse_code_call`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Client frames ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_code: Option<ExecutableCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableCode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_config: Option<VoiceConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomaticActivityDetection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_speech_sensitivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automatic_activity_detection: Option<AutomaticActivityDetection>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclGroup {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input_config: Option<RealtimeInputConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub tool_response: ToolResponse,
}

/// Mime type for PCM16 input at the given rate.
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

// ── Server frames ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub text: Option<String>,
    pub finished: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub turn_complete: Option<bool>,
    pub generation_complete: Option<bool>,
    pub interrupted: Option<bool>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    pub id: Option<String>,
    pub name: String,
    pub args: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// One inbound frame; every section is optional and unknown sections are
/// simply absent here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ToolCallMessage>,
    pub tool_call_cancellation: Option<Value>,
    pub go_away: Option<Value>,
    pub usage_metadata: Option<Value>,
}

// ── Textual tool-call encoding ───────────────────────────────────

/// Parse a restricted Python-like call expression such as
/// `default_api.get_weather(city='Paris', units="metric", days=3)` into a
/// bare tool name and flat keyword arguments.
///
/// The namespace prefix before the last dot is stripped, quoted values are
/// unquoted, and bare values are recognized as booleans, integers, or
/// floats. Nested structures are not supported; a call that does not fit
/// this shape returns `None`.
#[must_use]
pub fn parse_code_call(code: &str) -> Option<(String, Value)> {
    let mut expr = code.trim();
    // The model often wraps the call in print(...).
    if let Some(inner) = expr
        .strip_prefix("print(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        expr = inner.trim();
    }

    let open = expr.find('(')?;
    let close = expr.rfind(')')?;
    if close < open {
        return None;
    }

    let path = expr[..open].trim();
    let name = path.rsplit('.').next()?.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }

    let mut args = Map::new();
    for piece in split_top_level(&expr[open + 1..close]) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (key, raw) = piece.split_once('=')?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        args.insert(key.to_string(), parse_scalar(raw.trim()));
    }

    Some((name.to_string(), Value::Object(args)))
}

/// Split on commas that are not inside single or double quotes.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => {
                pieces.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&input[start..]);
    pieces
}

fn parse_scalar(raw: &str) -> Value {
    let unquoted = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')));
    if let Some(s) = unquoted {
        return Value::String(s.to_string());
    }
    match raw {
        "True" | "true" => return Value::Bool(true),
        "False" | "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_message_tolerates_unknown_sections() {
        let frame = r#"{"setupComplete":{},"somethingNew":{"x":1}}"#;
        let msg: ServerMessage = serde_json::from_str(frame).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn setup_serializes_camel_case() {
        let msg = SetupMessage {
            setup: Setup {
                model: "models/test".to_string(),
                generation_config: Some(GenerationConfig {
                    temperature: Some(0.8),
                    ..GenerationConfig::default()
                }),
                system_instruction: None,
                tools: None,
                realtime_input_config: Some(RealtimeInputConfig {
                    automatic_activity_detection: Some(AutomaticActivityDetection {
                        silence_duration_ms: Some(500),
                        ..AutomaticActivityDetection::default()
                    }),
                }),
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["setup"]["model"], "models/test");
        assert_eq!(
            json["setup"]["realtimeInputConfig"]["automaticActivityDetection"]
                ["silenceDurationMs"],
            500
        );
    }

    #[test]
    fn code_call_strips_namespace_and_unquotes() {
        let (name, args) =
            parse_code_call("default_api.get_weather(city='Paris', days=3)").unwrap();
        assert_eq!(name, "get_weather");
        assert_eq!(args, json!({"city": "Paris", "days": 3}));
    }

    #[test]
    fn code_call_handles_print_wrapper_and_quoted_commas() {
        let (name, args) =
            parse_code_call("print(tools.lookup(q=\"a, b\", exact=True))").unwrap();
        assert_eq!(name, "lookup");
        assert_eq!(args, json!({"q": "a, b", "exact": true}));
    }

    #[test]
    fn code_call_without_arguments() {
        let (name, args) = parse_code_call("get_time()").unwrap();
        assert_eq!(name, "get_time");
        assert_eq!(args, json!({}));
    }

    #[test]
    fn malformed_code_call_is_rejected() {
        assert!(parse_code_call("not a call").is_none());
        assert!(parse_code_call("f(positional)").is_none());
    }
}
