//! The duplex wire seam between protocol adapters and the socket.
//!
//! Adapters talk to a pair of trait objects rather than a concrete socket so
//! tests can drive them over in-process channels. Production connections are
//! built by [`crate::transport::ws`].

use crate::config::PipelineConfig;
use crate::Result;
use async_trait::async_trait;

/// One inbound frame, already stripped to what adapters consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    /// Transport-level ping; answered with a pong carrying the payload.
    Ping(Vec<u8>),
    /// The peer closed the connection.
    Closed,
}

/// Writing half of a duplex connection.
#[async_trait]
pub trait WireTx: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Reading half of a duplex connection. `None` means the stream ended.
#[async_trait]
pub trait WireRx: Send {
    async fn next_frame(&mut self) -> Option<Result<WireFrame>>;
}

/// Opens a duplex connection for a validated configuration, including any
/// backend-specific pre-steps.
#[async_trait]
pub trait WireConnector: Send + Sync {
    async fn connect(
        &self,
        config: &PipelineConfig,
    ) -> Result<(Box<dyn WireTx>, Box<dyn WireRx>)>;
}
