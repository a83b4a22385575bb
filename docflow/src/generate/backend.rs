//! Transports for generative requests.

use crate::errors::StepError;
use async_trait::async_trait;

/// Sends a JSON request payload and returns the JSON response envelope.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Performs one request.
    async fn send(&self, payload: &serde_json::Value) -> Result<serde_json::Value, StepError>;
}

/// A JSON-over-HTTP backend with optional bearer auth.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[cfg(feature = "http")]
impl HttpBackend {
    /// Creates a backend posting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: None,
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Uses a preconfigured client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl GenerativeBackend for HttpBackend {
    async fn send(&self, payload: &serde_json::Value) -> Result<serde_json::Value, StepError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        tracing::debug!(url = %self.url, "sending generative request");
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
