//! Unified real-time voice pipeline over heterogeneous duplex speech
//! backends.
//!
//! Three backends — a realtime-audio LLM endpoint, a native speech-to-speech
//! endpoint, and a conversational-agent endpoint — speak incompatible wire
//! protocols with their own VAD semantics and tool-calling encodings. This
//! crate normalizes them behind one contract: stream PCM16 audio in, receive
//! synthesized audio, transcripts, and tool calls through callbacks, with
//! per-turn latency metrics and batched parallel tool execution.
//!
//! ```no_run
//! use voicewire::{Backend, PipelineConfig, ToolSpec, VoicePipeline};
//!
//! # async fn run() -> voicewire::Result<()> {
//! let config = PipelineConfig::for_backend(Backend::OpenAiRealtime, "sk-...")
//!     .with_system_prompt("You are a helpful robot.")
//!     .with_voice("marin");
//! let pipeline = VoicePipeline::new(config)?;
//! pipeline.register_tool(ToolSpec::with_handler(
//!     "get_time",
//!     "Current wall-clock time",
//!     serde_json::json!({"type": "object", "properties": {}}),
//!     |_args| async { Ok("12:00".to_string()) },
//! ));
//! pipeline.on_audio_out(|pcm| println!("got {} bytes of audio", pcm.len()));
//! pipeline.start().await?;
//! pipeline.send_audio(&[0u8; 3200]).await?;
//! pipeline.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod tools;
pub mod transport;

pub use config::{Backend, PipelineConfig, VadConfig, VadMode, VadSensitivity};
pub use error::{ApiErrorKind, BackendApiError, Error, Result};
pub use metrics::{MetricsCollector, TurnSnapshot, METRICS_HISTORY_CAPACITY};
pub use pipeline::{
    AdapterContext, BackendRegistry, ConnectionState, ConvaiAdapter, EventCallbacks,
    GeminiAdapter, RealtimeAdapter, VoiceAdapter, VoicePipeline, MAX_AUDIO_CHUNK_BYTES,
};
pub use tools::{
    ToolDeclaration, ToolDispatcher, ToolInvocation, ToolRegistry, ToolResultSink, ToolSpec,
    DEFAULT_COALESCE_WINDOW,
};
pub use transport::wire::{WireConnector, WireFrame, WireRx, WireTx};
