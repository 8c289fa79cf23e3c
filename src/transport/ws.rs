//! WebSocket connectors for the three backends.

use crate::transport::wire::{WireFrame, WireRx, WireTx};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderValue;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const REALTIME_WS_URL: &str = "wss://api.openai.com/v1/realtime";
pub const GEMINI_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Connect to the realtime-audio LLM backend with bearer auth and the model
/// as a query parameter.
///
/// # Errors
/// Returns a classified handshake error if the dial fails.
pub async fn connect_realtime(api_key: &str, model: &str) -> Result<WsStream> {
    let mut url = Url::parse(REALTIME_WS_URL)?;
    url.query_pairs_mut().append_pair("model", model);

    let auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
    let mut request = url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert(reqwest::header::AUTHORIZATION, auth_header);

    let (stream, _) = connect_async(request).await.map_err(handshake_error)?;
    tracing::info!("connected to realtime backend");
    Ok(stream)
}

/// Connect to the speech-to-speech backend; the key travels as a query
/// parameter.
///
/// # Errors
/// Returns a classified handshake error if the dial fails.
pub async fn connect_gemini(api_key: &str) -> Result<WsStream> {
    let mut url = Url::parse(GEMINI_WS_URL)?;
    url.query_pairs_mut().append_pair("key", api_key);

    let (stream, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;
    tracing::info!("connected to speech-to-speech backend");
    Ok(stream)
}

/// Connect to a pre-signed conversational-agent socket URL obtained from the
/// REST pre-step.
///
/// # Errors
/// Returns a classified handshake error if the dial fails.
pub async fn connect_signed(signed_url: &str) -> Result<WsStream> {
    let url = Url::parse(signed_url)?;
    let (stream, _) = connect_async(url.as_str()).await.map_err(handshake_error)?;
    tracing::info!("connected to conversational-agent backend");
    Ok(stream)
}

/// Classify a failed WebSocket handshake: auth rejections are permanent,
/// everything else (timeouts, 5xx, transport resets) is worth retrying.
fn handshake_error(err: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    let retryable = match &err {
        WsError::Http(response) => {
            let status = response.status();
            !(status.as_u16() == 401 || status.as_u16() == 403)
        }
        WsError::Io(_) | WsError::Tls(_) => true,
        _ => false,
    };
    Error::Handshake {
        message: err.to_string(),
        retryable,
    }
}

/// Split a connected socket into the wire halves the adapters consume.
#[must_use]
pub fn split(stream: WsStream) -> (Box<dyn WireTx>, Box<dyn WireRx>) {
    let (sink, source) = stream.split();
    (Box::new(WsTx { sink }), Box::new(WsRx { source }))
}

struct WsTx {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl WireTx for WsTx {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink.send(Message::Pong(payload.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.send(Message::Close(None)).await?;
        Ok(())
    }
}

struct WsRx {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl WireRx for WsRx {
    async fn next_frame(&mut self) -> Option<Result<WireFrame>> {
        while let Some(msg) = self.source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return Some(Ok(WireFrame::Text(text.as_str().to_owned())));
                }
                Ok(Message::Ping(payload)) => {
                    return Some(Ok(WireFrame::Ping(payload.to_vec())));
                }
                Ok(Message::Close(_)) => return Some(Ok(WireFrame::Closed)),
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
        }
        None
    }
}
