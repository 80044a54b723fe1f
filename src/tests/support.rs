//! Shared helpers for the pipeline tests: a scripted moderation
//! provider and quick component builders with test-sized timings.

use crate::batch_orchestrator::{BatchOrchestrator, BatchOrchestratorConfig};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::concurrency_manager::{AdaptiveConcurrencyManager, ConcurrencyManagerConfig};
use crate::image_validator::{ImageValidator, ImageValidatorConfig, ValidatedImage};
use crate::moderation_provider::{ModerationProvider, ProviderError};
use crate::rate_limiter::{RateLimiterConfig, SlidingWindowRateLimiter};
use crate::retry_executor::{RetryExecutor, RetryExecutorConfig};
use crate::types::{ImagePayload, ModerationLabel};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Labels(Vec<ModerationLabel>),
    Throttled,
    Unavailable,
    AuthDenied,
    BadRequest,
}

/// Scripted stand-in for the external moderation API. Pops responses
/// off the script in order, then repeats the fallback.
pub struct MockProvider {
    script: Mutex<VecDeque<ScriptedResponse>>,
    fallback: ScriptedResponse,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn scripted(script: Vec<ScriptedResponse>, fallback: ScriptedResponse) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub fn always(fallback: ScriptedResponse) -> Self {
        Self::scripted(Vec::new(), fallback)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of dependency calls actually attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModerationProvider for MockProvider {
    async fn detect_moderation_labels(
        &self,
        _image_bytes: &[u8],
        _min_confidence: f32,
    ) -> Result<Vec<ModerationLabel>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut script = self.script.lock().unwrap();
            script.pop_front().unwrap_or_else(|| self.fallback.clone())
        };

        match next {
            ScriptedResponse::Labels(labels) => Ok(labels),
            ScriptedResponse::Throttled => {
                Err(ProviderError::Throttled("scripted throttle".to_string()))
            }
            ScriptedResponse::Unavailable => Err(ProviderError::ServiceUnavailable(
                "scripted outage".to_string(),
            )),
            ScriptedResponse::AuthDenied => {
                Err(ProviderError::AuthDenied("scripted auth failure".to_string()))
            }
            ScriptedResponse::BadRequest => {
                Err(ProviderError::BadRequest("scripted bad request".to_string()))
            }
        }
    }
}

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

pub fn png_bytes() -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(&[0u8; 16]);
    bytes
}

pub fn png_base64() -> String {
    general_purpose::STANDARD.encode(png_bytes())
}

pub fn validated_png(id: &str) -> ValidatedImage {
    ValidatedImage {
        id: id.to_string(),
        bytes: png_bytes(),
        format: ImageFormat::Png,
    }
}

pub fn payload(id: &str, base64: impl Into<String>) -> ImagePayload {
    ImagePayload {
        image_id: id.to_string(),
        image_base64: base64.into(),
    }
}

pub fn label(name: &str, confidence: f32) -> ModerationLabel {
    ModerationLabel {
        name: name.to_string(),
        confidence,
        parent_name: None,
        instances: None,
    }
}

pub fn child_label(name: &str, parent: &str, confidence: f32) -> ModerationLabel {
    ModerationLabel {
        name: name.to_string(),
        confidence,
        parent_name: Some(parent.to_string()),
        instances: None,
    }
}

/// Retry config with millisecond-scale backoff so tests stay fast
pub fn fast_retry_config() -> RetryExecutorConfig {
    RetryExecutorConfig {
        max_retries: 3,
        base_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        per_image_timeout: Duration::from_millis(500),
        ..RetryExecutorConfig::default()
    }
}

/// Limiter wide enough to never constrain a test
pub fn open_limiter() -> Arc<SlidingWindowRateLimiter> {
    Arc::new(SlidingWindowRateLimiter::new(RateLimiterConfig {
        max_requests: 1000,
        window: Duration::from_millis(100),
    }))
}

pub fn executor_with(
    provider: Arc<MockProvider>,
    config: RetryExecutorConfig,
    circuit_breaker: Arc<CircuitBreaker>,
) -> RetryExecutor {
    RetryExecutor::new(config, provider, open_limiter(), circuit_breaker)
}

pub fn orchestrator_with(provider: Arc<MockProvider>) -> BatchOrchestrator {
    orchestrator_with_config(
        provider,
        BatchOrchestratorConfig {
            batch_timeout: Duration::from_secs(5),
            inter_chunk_delay: Duration::from_millis(1),
            cleanup_interval: 50,
        },
    )
}

pub fn orchestrator_with_config(
    provider: Arc<MockProvider>,
    config: BatchOrchestratorConfig,
) -> BatchOrchestrator {
    let rate_limiter = open_limiter();
    let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let retry_executor = Arc::new(RetryExecutor::new(
        fast_retry_config(),
        provider,
        rate_limiter.clone(),
        circuit_breaker,
    ));

    BatchOrchestrator::new(
        config,
        ImageValidator::new(ImageValidatorConfig::default()),
        retry_executor,
        Arc::new(AdaptiveConcurrencyManager::new(
            ConcurrencyManagerConfig::default(),
        )),
        rate_limiter,
    )
}
