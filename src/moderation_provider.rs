//! The external moderation dependency behind a narrow contract: raw
//! image bytes plus a minimum confidence in, typed labels out. Vendor
//! taxonomy semantics stay opaque.

use crate::types::ModerationLabel;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub enum ProviderError {
    /// Dependency shed load (HTTP 429)
    Throttled(String),
    /// Dependency reported itself unavailable (HTTP 503)
    ServiceUnavailable(String),
    /// Dependency-side failure (other 5xx)
    InternalServer(String),
    /// Call exceeded its deadline
    RequestTimeout(String),
    /// Connection reset, refused, or otherwise failed in transit
    Network(String),
    /// Credentials rejected (HTTP 401/403)
    AuthDenied(String),
    /// Dependency rejected the request shape (HTTP 400)
    BadRequest(String),
    /// Response did not match the expected contract
    Malformed(String),
}

impl ProviderError {
    /// Transient failures worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_)
                | ProviderError::ServiceUnavailable(_)
                | ProviderError::InternalServer(_)
                | ProviderError::RequestTimeout(_)
                | ProviderError::Network(_)
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Throttled(msg) => write!(f, "Throttled by moderation API: {msg}"),
            ProviderError::ServiceUnavailable(msg) => {
                write!(f, "Moderation API unavailable: {msg}")
            }
            ProviderError::InternalServer(msg) => {
                write!(f, "Moderation API internal error: {msg}")
            }
            ProviderError::RequestTimeout(msg) => write!(f, "Moderation call timed out: {msg}"),
            ProviderError::Network(msg) => write!(f, "Network error: {msg}"),
            ProviderError::AuthDenied(msg) => write!(f, "Moderation API rejected credentials: {msg}"),
            ProviderError::BadRequest(msg) => write!(f, "Moderation API rejected request: {msg}"),
            ProviderError::Malformed(msg) => write!(f, "Malformed moderation response: {msg}"),
        }
    }
}

impl Error for ProviderError {}

/// The single call this pipeline makes against the outside world
#[async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn detect_moderation_labels(
        &self,
        image_bytes: &[u8],
        min_confidence: f32,
    ) -> Result<Vec<ModerationLabel>, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct HttpModerationProviderConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Transport-level timeout; the pipeline races its own per-image
    /// deadline on top of this
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct DetectLabelsResponse {
    #[serde(default)]
    labels: Vec<ModerationLabel>,
}

/// HTTP implementation of the moderation contract
pub struct HttpModerationProvider {
    client: Client,
    config: HttpModerationProviderConfig,
}

impl HttpModerationProvider {
    pub fn new(
        config: HttpModerationProviderConfig,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("ModerationPipeline/1.0")
            .build()?;

        Ok(Self { client, config })
    }

    fn classify_status(status: StatusCode, detail: String) -> ProviderError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled(detail),
            StatusCode::SERVICE_UNAVAILABLE => ProviderError::ServiceUnavailable(detail),
            StatusCode::REQUEST_TIMEOUT => ProviderError::RequestTimeout(detail),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthDenied(detail),
            StatusCode::BAD_REQUEST => ProviderError::BadRequest(detail),
            s if s.is_server_error() => ProviderError::InternalServer(detail),
            s => ProviderError::Malformed(format!("unexpected status {s}: {detail}")),
        }
    }

    fn classify_transport(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::RequestTimeout(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ModerationProvider for HttpModerationProvider {
    async fn detect_moderation_labels(
        &self,
        image_bytes: &[u8],
        min_confidence: f32,
    ) -> Result<Vec<ModerationLabel>, ProviderError> {
        let body = serde_json::json!({
            "image_base64": general_purpose::STANDARD.encode(image_bytes),
            "min_confidence": min_confidence,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, detail));
        }

        let parsed: DetectLabelsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        debug!(
            "moderation API returned {} labels for {} byte image",
            parsed.labels.len(),
            image_bytes.len()
        );

        Ok(parsed.labels)
    }
}
