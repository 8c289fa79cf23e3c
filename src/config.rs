//! Provider-scoped pipeline configuration.
//!
//! A [`PipelineConfig`] is built once per pipeline instance, validated before
//! any connection attempt, and mutated only while disconnected. The `with_*`
//! methods are pure copy-mutators in the builder style.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The three supported duplex speech backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Realtime-audio LLM endpoint (`session.update` handshake).
    #[serde(rename = "openai-realtime")]
    OpenAiRealtime,
    /// Native speech-to-speech endpoint (`setup` / `setupComplete` handshake).
    #[serde(rename = "gemini-live")]
    GeminiLive,
    /// Conversational-agent endpoint (signed-URL pre-step, ping/pong keepalive).
    #[serde(rename = "elevenlabs-agent")]
    ElevenLabsAgent,
}

impl Backend {
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::OpenAiRealtime => "openai-realtime",
            Self::GeminiLive => "gemini-live",
            Self::ElevenLabsAgent => "elevenlabs-agent",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai-realtime" => Ok(Self::OpenAiRealtime),
            "gemini-live" => Ok(Self::GeminiLive),
            "elevenlabs-agent" => Ok(Self::ElevenLabsAgent),
            other => Err(Error::Config(format!("unknown backend: {other}"))),
        }
    }
}

/// Turn-detection mode requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadMode {
    #[default]
    ServerVad,
    SemanticVad,
    Disabled,
}

/// Start/end-of-speech sensitivity used by the speech-to-speech backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadSensitivity {
    #[default]
    High,
    Low,
}

/// Voice-activity-detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadConfig {
    pub mode: VadMode,
    /// Activation threshold, 0.0–1.0.
    pub threshold: f32,
    /// Audio retained before detected speech start.
    pub prefix_padding: Duration,
    /// Trailing silence that ends the user's turn.
    pub silence_duration: Duration,
    pub start_sensitivity: VadSensitivity,
    pub end_sensitivity: VadSensitivity,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            mode: VadMode::ServerVad,
            threshold: 0.5,
            prefix_padding: Duration::from_millis(300),
            silence_duration: Duration::from_millis(500),
            start_sensitivity: VadSensitivity::High,
            end_sensitivity: VadSensitivity::High,
        }
    }
}

/// Complete capability configuration for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub backend: Backend,
    pub api_key: String,
    /// Model identifier; per-backend default applied by [`Self::for_backend`].
    pub model: String,
    /// Agent identifier, required by the conversational-agent backend.
    pub agent_id: Option<String>,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub vad: VadConfig,
    /// Sampling temperature, 0.0–2.0.
    pub temperature: f32,
    pub max_response_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub voice: Option<String>,
    /// Synthesized speech rate multiplier, (0.0, 4.0].
    pub speech_rate: f32,
    /// Duration of one outbound audio chunk.
    pub chunk_duration: Duration,
    /// Coalescing window for batched tool execution.
    pub tool_batch_window: Duration,
    pub debug: bool,
}

impl PipelineConfig {
    pub const DEFAULT_TOOL_BATCH_WINDOW: Duration = Duration::from_millis(50);

    /// A configuration carrying the documented defaults for `backend`.
    #[must_use]
    pub fn for_backend(backend: Backend, api_key: impl Into<String>) -> Self {
        let (model, input_sample_rate, output_sample_rate) = match backend {
            Backend::OpenAiRealtime => ("gpt-realtime", 24_000, 24_000),
            Backend::GeminiLive => {
                ("models/gemini-2.0-flash-live-001", 16_000, 24_000)
            }
            Backend::ElevenLabsAgent => ("", 16_000, 16_000),
        };
        Self {
            backend,
            api_key: api_key.into(),
            model: model.to_string(),
            agent_id: None,
            input_sample_rate,
            output_sample_rate,
            vad: VadConfig::default(),
            temperature: 0.8,
            max_response_tokens: None,
            system_prompt: None,
            voice: None,
            speech_rate: 1.0,
            chunk_duration: Duration::from_millis(100),
            tool_batch_window: Self::DEFAULT_TOOL_BATCH_WINDOW,
            debug: false,
        }
    }

    /// Check numeric ranges and backend-required identifiers.
    ///
    /// # Errors
    /// Returns [`Error::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(Error::Config(format!(
                "vad threshold {} out of range [0.0, 1.0]",
                self.vad.threshold
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature {} out of range [0.0, 2.0]",
                self.temperature
            )));
        }
        if self.speech_rate <= 0.0 || self.speech_rate > 4.0 {
            return Err(Error::Config(format!(
                "speech rate {} out of range (0.0, 4.0]",
                self.speech_rate
            )));
        }
        if self.api_key.is_empty() {
            return Err(Error::Config("api_key is required".to_string()));
        }
        match self.backend {
            Backend::ElevenLabsAgent => {
                if self.agent_id.as_deref().is_none_or(str::is_empty) {
                    return Err(Error::Config(
                        "agent_id is required for the conversational-agent backend"
                            .to_string(),
                    ));
                }
            }
            Backend::OpenAiRealtime | Backend::GeminiLive => {
                if self.model.is_empty() {
                    return Err(Error::Config(format!(
                        "model is required for backend {}",
                        self.backend
                    )));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    #[must_use]
    pub const fn with_chunk_duration(mut self, chunk_duration: Duration) -> Self {
        self.chunk_duration = chunk_duration;
        self
    }

    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}
