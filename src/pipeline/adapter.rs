//! The adapter contract and the runtime shared by all three adapters.
//!
//! Each backend's adapter decodes its own wire frames into the canonical
//! [`AdapterEvent`] taxonomy and hands them to [`AdapterShared::route_event`];
//! routing, metrics marks, callback dispatch, and tool-batching hookup are
//! identical regardless of backend. One wire frame may decode to several
//! canonical events, so decoders return a `Vec`.

use crate::config::PipelineConfig;
use crate::error::BackendApiError;
use crate::metrics::MetricsCollector;
use crate::pipeline::callbacks::EventCallbacks;
use crate::tools::{ToolDispatcher, ToolInvocation, ToolRegistry, ToolResultSink};
use crate::transport::wire::{WireConnector, WireFrame, WireRx, WireTx};
use crate::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose;
use base64::Engine as _;
use std::borrow::Cow;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Largest PCM buffer accepted by a single `send_audio` call.
pub const MAX_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;

const TRACE_LOG_MAX_BYTES: usize = 1024;
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one adapter's connection. Only the adapter mutates this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket is open, backend has not yet acknowledged the session.
    SessionPending,
    /// Backend acknowledged session readiness; audio is accepted.
    Ready,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Canonical event taxonomy every backend decodes into.
#[derive(Debug)]
pub enum AdapterEvent {
    /// Backend acknowledged session configuration.
    SessionReady,
    SpeechStarted,
    SpeechStopped,
    Transcript { text: String, is_final: bool },
    ResponseText { text: String, is_final: bool },
    /// Decoded PCM16 output audio.
    AudioOut(Vec<u8>),
    ToolCall(ToolInvocation),
    Interrupted,
    /// The model finished delivering its response for this turn.
    TurnComplete,
    BackendError(BackendApiError),
    /// A frame that must be answered immediately (application-level pong).
    Reply(String),
    /// Recognized but irrelevant, or unrecognized and skipped.
    Ignored,
}

/// Uniform adapter contract consumed by the pipeline façade.
#[async_trait]
pub trait VoiceAdapter: Send + Sync {
    /// Open the connection, run backend-specific session setup, and spawn
    /// the read task. Returns once the backend has acknowledged session
    /// readiness. Fails with [`Error::AlreadyConnected`] if not
    /// disconnected.
    async fn start(&self) -> Result<()>;

    /// Tear down the read task and close the socket. Idempotent.
    async fn stop(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Encode and write one PCM16 chunk. Fails with [`Error::NotConnected`]
    /// unless the session is ready.
    async fn send_audio(&self, pcm: &[u8]) -> Result<()>;

    /// Send the backend's interruption signal, where one exists client-side.
    async fn interrupt(&self) -> Result<()>;

    /// Send one tool result plus the backend's continue signal.
    async fn submit_tool_result(&self, call_id: &str, output: &str) -> Result<()>;

    /// Apply a new configuration to the live session. Returns `false` when
    /// the backend has no live-reconfiguration support.
    async fn update_session(&self, config: &PipelineConfig) -> Result<bool>;
}

/// Everything one pipeline instance shares across its façade, adapter, and
/// read task.
#[derive(Clone)]
pub struct AdapterContext {
    pub config: Arc<RwLock<PipelineConfig>>,
    pub callbacks: Arc<EventCallbacks>,
    pub metrics: Arc<MetricsCollector>,
    pub registry: Arc<ToolRegistry>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AdapterContext {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::clone(&registry),
            config.tool_batch_window,
        ));
        Self {
            config: Arc::new(RwLock::new(config)),
            callbacks: Arc::new(EventCallbacks::new()),
            metrics: Arc::new(MetricsCollector::new()),
            registry,
            dispatcher,
        }
    }

    pub(crate) fn config_snapshot(&self) -> PipelineConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Per-connection routing state handed to the read loop.
#[derive(Clone)]
pub(crate) struct AdapterShared {
    pub callbacks: Arc<EventCallbacks>,
    pub metrics: Arc<MetricsCollector>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub state: Arc<StdMutex<ConnectionState>>,
}

impl AdapterShared {
    pub fn new(ctx: &AdapterContext) -> Self {
        Self {
            callbacks: Arc::clone(&ctx.callbacks),
            metrics: Arc::clone(&ctx.metrics),
            dispatcher: Arc::clone(&ctx.dispatcher),
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Dispatch one canonical event: callbacks, metrics marks, tool batching.
    pub async fn route_event(&self, event: AdapterEvent, sink: &Arc<dyn ToolResultSink>) {
        match event {
            AdapterEvent::SessionReady => {
                self.set_state(ConnectionState::Ready);
                tracing::info!("session ready");
            }
            AdapterEvent::SpeechStarted => self.callbacks.emit_speech_start(),
            AdapterEvent::SpeechStopped => self.callbacks.emit_speech_end(),
            AdapterEvent::Transcript { text, is_final } => {
                self.callbacks.emit_transcript(&text, is_final);
            }
            AdapterEvent::ResponseText { text, is_final } => {
                self.callbacks.emit_response(&text, is_final);
            }
            AdapterEvent::AudioOut(pcm) => {
                self.metrics.mark_receive_start();
                self.metrics.mark_pipeline_end();
                self.metrics.increment_audio_out();
                self.callbacks.emit_audio_out(&pcm);
                self.metrics.mark_receive_end();
            }
            AdapterEvent::ToolCall(call) => {
                if !self.callbacks.emit_tool_call(call.clone()) {
                    Arc::clone(&self.dispatcher).enqueue(call, Arc::clone(sink)).await;
                }
            }
            AdapterEvent::Interrupted => self.callbacks.emit_interruption(),
            AdapterEvent::TurnComplete => {
                self.metrics.mark_response_done();
                self.metrics.complete_turn();
            }
            AdapterEvent::BackendError(api_error) => {
                let error = Error::Api(api_error);
                tracing::warn!(retryable = error.is_retryable(), "backend error: {error}");
                self.callbacks.emit_error(&error);
            }
            AdapterEvent::Reply(_) | AdapterEvent::Ignored => {}
        }
    }
}

/// Shared writing half: the socket is written under this lock so frames
/// never interleave.
pub(crate) type SharedWriter = Arc<Mutex<Box<dyn WireTx>>>;

/// Handle to one live connection.
pub(crate) struct Conn {
    pub writer: SharedWriter,
    pub shutdown: watch::Sender<bool>,
    pub reader: JoinHandle<()>,
}

/// Open a connection for `config`, send the backend's setup frames, wait for
/// session readiness, and spawn the read task. On success the connection
/// handle is stored in `conn_slot` and the state is `Ready`.
pub(crate) async fn open_connection<D>(
    connector: &Arc<dyn WireConnector>,
    shared: &AdapterShared,
    conn_slot: &mut Option<Conn>,
    config: &PipelineConfig,
    setup_frames: Vec<String>,
    make_sink: impl FnOnce(SharedWriter) -> Arc<dyn ToolResultSink>,
    decode: D,
) -> Result<()>
where
    D: Fn(&str) -> Vec<AdapterEvent> + Clone + Send + 'static,
{
    if shared.state() != ConnectionState::Disconnected {
        return Err(Error::AlreadyConnected);
    }
    if conn_slot.is_some() {
        // Stale handle left behind by a peer-initiated disconnect.
        close_connection(shared, conn_slot).await?;
    }
    config.validate()?;
    shared.set_state(ConnectionState::Connecting);

    let (tx, mut rx) = match connector.connect(config).await {
        Ok(pair) => pair,
        Err(err) => {
            shared.set_state(ConnectionState::Disconnected);
            return Err(err);
        }
    };
    let writer: SharedWriter = Arc::new(Mutex::new(tx));
    shared.set_state(ConnectionState::SessionPending);

    let sink = make_sink(Arc::clone(&writer));
    let setup_and_ready = async {
        for frame in setup_frames {
            writer.lock().await.send_text(frame).await?;
        }
        await_ready(&mut rx, &writer, shared, &sink, &decode).await
    };
    if let Err(err) = setup_and_ready.await {
        let mut w = writer.lock().await;
        let _ = w.close().await;
        drop(w);
        shared.set_state(ConnectionState::Disconnected);
        return Err(err);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reader = tokio::spawn(read_loop(
        rx,
        Arc::clone(&writer),
        shared.clone(),
        sink,
        shutdown_rx,
        decode,
    ));
    *conn_slot = Some(Conn {
        writer,
        shutdown: shutdown_tx,
        reader,
    });
    Ok(())
}

/// Drain frames until the backend acknowledges session readiness; events
/// arriving before the acknowledgment are routed normally so nothing is
/// dropped. A structured backend error during the handshake is fatal.
async fn await_ready<D>(
    rx: &mut Box<dyn WireRx>,
    writer: &SharedWriter,
    shared: &AdapterShared,
    sink: &Arc<dyn ToolResultSink>,
    decode: &D,
) -> Result<()>
where
    D: Fn(&str) -> Vec<AdapterEvent>,
{
    let wait = async {
        while let Some(frame) = rx.next_frame().await {
            match frame? {
                WireFrame::Text(text) => {
                    tracing::trace!("recv frame: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                    let mut ready = false;
                    for event in decode(&text) {
                        match event {
                            AdapterEvent::SessionReady => {
                                ready = true;
                                shared.route_event(AdapterEvent::SessionReady, sink).await;
                            }
                            AdapterEvent::BackendError(api_error) => {
                                return Err(Error::Api(api_error));
                            }
                            AdapterEvent::Reply(payload) => {
                                writer.lock().await.send_text(payload).await?;
                            }
                            other => shared.route_event(other, sink).await,
                        }
                    }
                    if ready {
                        return Ok(());
                    }
                }
                WireFrame::Ping(payload) => {
                    writer.lock().await.send_pong(payload).await?;
                }
                WireFrame::Closed => return Err(Error::ConnectionClosed),
            }
        }
        Err(Error::ConnectionClosed)
    };
    (tokio::time::timeout(READY_TIMEOUT, wait).await).map_or_else(
        |_| {
            Err(Error::Handshake {
                message: "timed out waiting for session readiness".to_string(),
                retryable: true,
            })
        },
        |result| result,
    )
}

/// Signal the read task, close the socket, and reap the task. Safe to call
/// on an already-stopped connection slot.
pub(crate) async fn close_connection(
    shared: &AdapterShared,
    conn_slot: &mut Option<Conn>,
) -> Result<()> {
    let Some(conn) = conn_slot.take() else {
        shared.set_state(ConnectionState::Disconnected);
        return Ok(());
    };
    let _ = conn.shutdown.send(true);
    {
        let mut w = conn.writer.lock().await;
        let _ = w.close().await;
    }
    let mut reader = conn.reader;
    if tokio::time::timeout(STOP_TIMEOUT, &mut reader).await.is_err() {
        reader.abort();
    }
    shared.set_state(ConnectionState::Disconnected);
    Ok(())
}

/// The per-connection read loop: one frame at a time, decoded by the
/// adapter-supplied closure, routed through the shared runtime. Exits on
/// shutdown signal, socket close, or read error.
pub(crate) async fn read_loop<D>(
    mut rx: Box<dyn WireRx>,
    writer: SharedWriter,
    shared: AdapterShared,
    sink: Arc<dyn ToolResultSink>,
    mut shutdown: watch::Receiver<bool>,
    decode: D,
) where
    D: Fn(&str) -> Vec<AdapterEvent> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = rx.next_frame() => match frame {
                Some(Ok(WireFrame::Text(text))) => {
                    tracing::trace!("recv frame: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                    for event in decode(&text) {
                        if let AdapterEvent::Reply(payload) = event {
                            let mut w = writer.lock().await;
                            if let Err(err) = w.send_text(payload).await {
                                tracing::warn!(error = %err, "failed to answer keepalive");
                            }
                            continue;
                        }
                        shared.route_event(event, &sink).await;
                    }
                }
                Some(Ok(WireFrame::Ping(payload))) => {
                    let mut w = writer.lock().await;
                    if let Err(err) = w.send_pong(payload).await {
                        tracing::warn!(error = %err, "failed to answer ping");
                    }
                }
                Some(Ok(WireFrame::Closed)) | None => {
                    tracing::info!("connection closed by peer");
                    shared.callbacks.emit_error(&Error::ConnectionClosed);
                    break;
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "read failed, closing connection");
                    shared.callbacks.emit_error(&err);
                    break;
                }
            }
        }
    }
    shared.set_state(ConnectionState::Disconnected);
}

/// Validate and base64-encode one outbound PCM chunk.
pub(crate) fn encode_pcm(pcm: &[u8]) -> Result<String> {
    if pcm.len() > MAX_AUDIO_CHUNK_BYTES {
        return Err(Error::InvalidFrame(format!(
            "audio chunk of {} bytes exceeds the {MAX_AUDIO_CHUNK_BYTES}-byte limit",
            pcm.len()
        )));
    }
    Ok(general_purpose::STANDARD.encode(pcm))
}

/// Decode a base64 audio field; `None` on corrupt payloads.
pub(crate) fn decode_pcm(data: &str) -> Option<Vec<u8>> {
    general_purpose::STANDARD.decode(data.as_bytes()).ok()
}

/// Bound a wire frame for trace logging without splitting a UTF-8 char.
pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!(
        "{} ... (truncated) {} bytes",
        &s[..end],
        s.len() - end
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips_all_lengths() {
        for len in [0usize, 1, 2, 3, 4, 5, 7, 256, 1023] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let encoded = encode_pcm(&data).unwrap();
            assert_eq!(decode_pcm(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn oversized_chunk_is_rejected() {
        let data = vec![0u8; MAX_AUDIO_CHUNK_BYTES + 1];
        assert!(encode_pcm(&data).is_err());
    }

    #[test]
    fn safe_truncate_respects_char_boundaries() {
        let s = "ααααα";
        let out = safe_truncate(s, 3);
        assert!(out.starts_with('α'));
        assert!(out.contains("truncated"));
    }
}
