//! The pipeline façade and backend registry.
//!
//! Application code builds a [`crate::PipelineConfig`], obtains a
//! [`VoicePipeline`] for the selected backend, registers tools and event
//! callbacks, calls [`VoicePipeline::start`], streams audio in, and receives
//! audio/transcript/tool-call events through callbacks until
//! [`VoicePipeline::stop`].

pub mod adapter;
pub mod callbacks;
pub mod convai;
pub mod gemini;
pub mod realtime;

pub use adapter::{
    AdapterContext, AdapterEvent, ConnectionState, VoiceAdapter, MAX_AUDIO_CHUNK_BYTES,
};
pub use callbacks::EventCallbacks;
pub use convai::ConvaiAdapter;
pub use gemini::GeminiAdapter;
pub use realtime::RealtimeAdapter;

use crate::config::{Backend, PipelineConfig};
use crate::metrics::{MetricsCollector, TurnSnapshot};
use crate::tools::{ToolInvocation, ToolSpec};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

pub type AdapterFactory = Box<dyn Fn(AdapterContext) -> Box<dyn VoiceAdapter> + Send + Sync>;

/// Explicit backend-to-adapter mapping. Constructed and populated by the
/// application (or taken with the built-in defaults) and passed to whatever
/// builds a [`VoicePipeline`]; nothing registers itself behind the scenes.
pub struct BackendRegistry {
    factories: HashMap<Backend, AdapterFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry carrying all three built-in adapters.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Backend::OpenAiRealtime, |ctx| {
            Box::new(RealtimeAdapter::new(ctx))
        });
        registry.register(Backend::GeminiLive, |ctx| Box::new(GeminiAdapter::new(ctx)));
        registry.register(Backend::ElevenLabsAgent, |ctx| {
            Box::new(ConvaiAdapter::new(ctx))
        });
        registry
    }

    /// The last registration for a backend wins.
    pub fn register(
        &mut self,
        backend: Backend,
        factory: impl Fn(AdapterContext) -> Box<dyn VoiceAdapter> + Send + Sync + 'static,
    ) {
        self.factories.insert(backend, Box::new(factory));
    }

    /// Build an adapter for `backend`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if no factory is registered.
    pub fn build(
        &self,
        backend: Backend,
        ctx: AdapterContext,
    ) -> Result<Box<dyn VoiceAdapter>> {
        let factory = self.factories.get(&backend).ok_or_else(|| {
            Error::Config(format!("no adapter registered for backend {backend}"))
        })?;
        Ok(factory(ctx))
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// The single contract application code depends on: one adapter composed
/// with config, metrics, and tool dispatch.
pub struct VoicePipeline {
    ctx: AdapterContext,
    adapter: Box<dyn VoiceAdapter>,
}

impl std::fmt::Debug for VoicePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePipeline").finish_non_exhaustive()
    }
}

impl VoicePipeline {
    /// Build a pipeline for the config's backend using the built-in
    /// adapters.
    ///
    /// # Errors
    /// Returns a configuration error if validation fails.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_registry(config, &BackendRegistry::with_defaults())
    }

    /// Build a pipeline against an explicit registry.
    ///
    /// # Errors
    /// Returns a configuration error if validation fails or the backend has
    /// no registered factory.
    pub fn with_registry(config: PipelineConfig, registry: &BackendRegistry) -> Result<Self> {
        config.validate()?;
        let backend = config.backend;
        let ctx = AdapterContext::new(config);
        let adapter = registry.build(backend, ctx.clone())?;
        Ok(Self { ctx, adapter })
    }

    /// # Errors
    /// Fails with [`Error::AlreadyConnected`] on a live pipeline, or with a
    /// classified connection error if the handshake or session setup fails.
    pub async fn start(&self) -> Result<()> {
        self.adapter.start().await
    }

    /// Idempotent teardown.
    ///
    /// # Errors
    /// Currently infallible in practice; kept fallible for parity with
    /// `start`.
    pub async fn stop(&self) -> Result<()> {
        self.adapter.stop().await
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.adapter.state()
    }

    /// Stream one chunk of PCM16 audio to the backend.
    ///
    /// # Errors
    /// Fails with [`Error::NotConnected`] unless the session is ready.
    pub async fn send_audio(&self, pcm: &[u8]) -> Result<()> {
        self.adapter.send_audio(pcm).await
    }

    /// Ask the backend to stop the in-flight response, where supported.
    ///
    /// # Errors
    /// Fails with [`Error::NotConnected`] unless the session is ready.
    pub async fn interrupt(&self) -> Result<()> {
        self.adapter.interrupt().await
    }

    /// Submit a tool result for `call_id` and ask the backend to resume
    /// generation. Used by external tool-call handlers.
    ///
    /// # Errors
    /// Fails with [`Error::NotConnected`] unless the session is ready.
    pub async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()> {
        self.adapter.submit_tool_result(call_id, output).await
    }

    /// Register a tool. Takes effect in the session handshake, so tools
    /// registered while connected are advertised on the next `start`.
    pub fn register_tool(&self, spec: ToolSpec) {
        self.ctx.registry.register(spec);
    }

    pub fn on_audio_out(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_audio_out(f);
    }

    pub fn on_speech_start(&self, f: impl Fn() + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_speech_start(f);
    }

    pub fn on_speech_end(&self, f: impl Fn() + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_speech_end(f);
    }

    pub fn on_transcript(&self, f: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_transcript(f);
    }

    pub fn on_response(&self, f: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_response(f);
    }

    /// Registering this bypasses the batched dispatcher; the callback must
    /// submit results via [`Self::submit_tool_result`].
    pub fn on_tool_call(&self, f: impl Fn(ToolInvocation) + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_tool_call(f);
    }

    pub fn on_error(&self, f: impl Fn(&Error) + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_error(f);
    }

    pub fn on_interruption(&self, f: impl Fn() + Send + Sync + 'static) {
        self.ctx.callbacks.set_on_interruption(f);
    }

    /// Snapshot of the live turn's metrics.
    #[must_use]
    pub fn metrics(&self) -> TurnSnapshot {
        self.ctx.metrics.current()
    }

    /// Mean metrics over the rolling turn history.
    #[must_use]
    pub fn average_metrics(&self) -> TurnSnapshot {
        self.ctx.metrics.average()
    }

    /// The underlying collector, for consumers that mark capture/playback
    /// stages themselves.
    #[must_use]
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.ctx.metrics)
    }

    #[must_use]
    pub fn config(&self) -> PipelineConfig {
        self.ctx.config_snapshot()
    }

    /// Replace the configuration. On a live session the backend is
    /// reconfigured immediately when it supports that; otherwise the new
    /// config takes effect on the next `start`.
    ///
    /// # Errors
    /// Returns a configuration error on validation failure or an attempt to
    /// switch backends.
    pub async fn update_config(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let current_backend = self.ctx.config_snapshot().backend;
        if config.backend != current_backend {
            return Err(Error::Config(
                "backend cannot be changed on an existing pipeline".to_string(),
            ));
        }
        *self
            .ctx
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config.clone();
        if self.adapter.is_connected() {
            if self.adapter.update_session(&config).await? {
                tracing::info!("session reconfigured live");
            } else {
                tracing::debug!("new configuration takes effect on the next start");
            }
        }
        Ok(())
    }
}
