use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error classes reported by the remote backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// A structured error received over the socket or from a REST pre-step.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendApiError {
    #[serde(rename = "type", default = "BackendApiError::unknown_kind")]
    pub kind: ApiErrorKind,
    pub code: Option<String>,
    pub message: String,
    pub event_id: Option<String>,
}

impl BackendApiError {
    const fn unknown_kind() -> ApiErrorKind {
        ApiErrorKind::Unknown
    }

    /// Rate-limited and server-side failures are worth retrying; auth and
    /// request-shape failures are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::RateLimitError | ApiErrorKind::ServerError
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Backend API error: {0:?}")]
    Api(BackendApiError),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("Handshake failed: {message}")]
    Handshake { message: String, retryable: bool },

    #[error("Tool execution failed: {0}")]
    Tool(String),

    #[error("Invalid outbound frame: {0}")]
    InvalidFrame(String),
}

impl Error {
    /// Whether the failure looks transient. The pipeline only classifies;
    /// retry policy belongs to the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handshake { retryable, .. } => *retryable,
            Self::Api(err) => err.is_retryable(),
            Self::Http(err) => {
                err.is_timeout() || err.status().is_some_and(|s| s.is_server_error())
            }
            Self::WebSocket(_) | Self::Io(_) | Self::ConnectionClosed => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
