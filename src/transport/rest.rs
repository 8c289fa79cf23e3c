//! REST pre-step for the conversational-agent backend: a signed socket URL
//! is fetched for the configured agent before the WebSocket handshake.

use crate::Result;
use reqwest::header::HeaderValue;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const CONVAI_BASE_URL: &str = "https://api.elevenlabs.io/v1/convai";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// Thin client for the conversational-agent REST surface.
#[derive(Clone, Debug)]
pub struct AgentRestClient {
    client: Client,
    api_key_header: HeaderValue,
}

impl AgentRestClient {
    /// # Errors
    /// Returns an error if the API key is not a valid header value or the
    /// HTTP client cannot be built.
    pub fn new(api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .build()?;
        let api_key_header = HeaderValue::from_str(api_key)?;
        Ok(Self {
            client,
            api_key_header,
        })
    }

    /// Fetch a pre-signed socket URL scoped to `agent_id`.
    ///
    /// # Errors
    /// Returns an error on HTTP failure; 5xx and timeouts classify as
    /// retryable through [`crate::Error::is_retryable`].
    pub async fn get_signed_url(&self, agent_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{CONVAI_BASE_URL}/conversation/get-signed-url"))
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", &self.api_key_header)
            .send()
            .await?
            .error_for_status()?;
        let body: SignedUrlResponse = response.json().await?;
        Ok(body.signed_url)
    }
}
