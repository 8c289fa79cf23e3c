//! In-process wire doubles shared by the integration tests: adapters talk
//! to channel-backed halves instead of a socket, and each test scripts the
//! server side.

use async_trait::async_trait;
use std::sync::Mutex;
use voicewire::{Error, PipelineConfig, Result, WireConnector, WireFrame, WireRx, WireTx};
use tokio::sync::mpsc;

pub struct MockServerHandle {
    /// Push frames that the adapter will read.
    pub to_client: mpsc::UnboundedSender<String>,
    /// Frames the adapter wrote.
    pub from_client: mpsc::UnboundedReceiver<String>,
}

/// A connector that hands out one scripted connection.
pub struct MockConnector {
    halves: Mutex<Option<(Box<dyn WireTx>, Box<dyn WireRx>)>>,
}

impl MockConnector {
    pub fn new() -> (std::sync::Arc<Self>, MockServerHandle) {
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let connector = std::sync::Arc::new(Self {
            halves: Mutex::new(Some((
                Box::new(MockTx { out: client_tx }) as Box<dyn WireTx>,
                Box::new(MockRx { incoming: client_rx }) as Box<dyn WireRx>,
            ))),
        });
        let handle = MockServerHandle {
            to_client,
            from_client,
        };
        (connector, handle)
    }
}

#[async_trait]
impl WireConnector for MockConnector {
    async fn connect(
        &self,
        _config: &PipelineConfig,
    ) -> Result<(Box<dyn WireTx>, Box<dyn WireRx>)> {
        self.halves
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Handshake {
                message: "mock connection already used".to_string(),
                retryable: false,
            })
    }
}

struct MockTx {
    out: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl WireTx for MockTx {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.out.send(text).map_err(|_| Error::ConnectionClosed)
    }

    async fn send_pong(&mut self, _payload: Vec<u8>) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MockRx {
    incoming: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl WireRx for MockRx {
    async fn next_frame(&mut self) -> Option<Result<WireFrame>> {
        self.incoming.recv().await.map(|text| Ok(WireFrame::Text(text)))
    }
}

/// The frame a realtime mock server answers session setup with.
pub fn session_created_frame() -> String {
    serde_json::json!({
        "type": "session.created",
        "event_id": "evt_0",
        "session": {}
    })
    .to_string()
}
