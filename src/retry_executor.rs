use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::image_validator::ValidatedImage;
use crate::moderation_provider::{ModerationProvider, ProviderError};
use crate::rate_limiter::SlidingWindowRateLimiter;
use crate::types::{ModerationLabel, ModerationResult, ModerationSettings};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryExecutorConfig {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for one moderation call, including queueing inside the
    /// dependency
    pub per_image_timeout: Duration,
    /// Default minimum label confidence (0-100) to flag an image
    pub confidence_threshold: f32,
    /// Default label/parent names that count as NSFW
    pub nsfw_categories: Vec<String>,
}

impl Default for RetryExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(5000),
            per_image_timeout: Duration::from_secs(8),
            confidence_threshold: 80.0,
            nsfw_categories: vec![
                "Explicit Nudity".to_string(),
                "Suggestive".to_string(),
                "Violence".to_string(),
                "Visually Disturbing".to_string(),
                "Hate Symbols".to_string(),
            ],
        }
    }
}

/// Drives one validated image through rate limiter, circuit breaker,
/// per-image timeout, and classified retries with jittered exponential
/// backoff. Infallible at its boundary: every image yields exactly one
/// `ModerationResult`, success or not.
pub struct RetryExecutor {
    config: RetryExecutorConfig,
    provider: Arc<dyn ModerationProvider>,
    rate_limiter: Arc<SlidingWindowRateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(
        config: RetryExecutorConfig,
        provider: Arc<dyn ModerationProvider>,
        rate_limiter: Arc<SlidingWindowRateLimiter>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            provider,
            rate_limiter,
            circuit_breaker,
        }
    }

    pub fn config(&self) -> &RetryExecutorConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        image: &ValidatedImage,
        settings: Option<&ModerationSettings>,
    ) -> ModerationResult {
        let started = Instant::now();
        let threshold = settings
            .and_then(|s| s.confidence_threshold)
            .unwrap_or(self.config.confidence_threshold);
        let categories: &[String] = settings
            .and_then(|s| s.categories.as_deref())
            .unwrap_or(&self.config.nsfw_categories);

        let mut retry_count = 0u32;

        loop {
            self.rate_limiter.wait_for_availability().await;
            self.rate_limiter.record_request().await;

            let outcome = self
                .circuit_breaker
                .execute(|| async {
                    match tokio::time::timeout(
                        self.config.per_image_timeout,
                        self.provider.detect_moderation_labels(&image.bytes, threshold),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::RequestTimeout(format!(
                            "no response within {:?}",
                            self.config.per_image_timeout
                        ))),
                    }
                })
                .await;

            match outcome {
                Ok(labels) => {
                    return self.success_result(image, labels, threshold, categories, started, retry_count);
                }
                Err(CircuitBreakerError::Open(open)) => {
                    // Fail fast: no dependency call was attempted
                    debug!("image {} rejected by open circuit breaker", image.id);
                    return ModerationResult {
                        image_id: image.id.clone(),
                        is_nsfw: false,
                        labels: Vec::new(),
                        confidence_score: 0.0,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        retry_count,
                        error: Some(open.to_string()),
                    };
                }
                Err(CircuitBreakerError::Inner(err)) => {
                    if err.is_retryable() && retry_count < self.config.max_retries {
                        let delay = self.backoff_delay(retry_count);
                        debug!(
                            "retryable failure for image {} (attempt {}): {}, backing off {:?}",
                            image.id,
                            retry_count + 1,
                            err,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        retry_count += 1;
                        continue;
                    }

                    if err.is_retryable() {
                        warn!(
                            "giving up on image {} after {} retries: {}",
                            image.id, retry_count, err
                        );
                    } else {
                        warn!("non-retryable failure for image {}: {}", image.id, err);
                    }

                    return ModerationResult {
                        image_id: image.id.clone(),
                        is_nsfw: false,
                        labels: Vec::new(),
                        confidence_score: 0.0,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        retry_count,
                        error: Some(err.to_string()),
                    };
                }
            }
        }
    }

    /// Exponential backoff with uniform jitter of up to one base
    /// interval, capped at `max_backoff`
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let base_ms = self.config.base_backoff.as_millis() as u64;
        let cap_ms = self.config.max_backoff.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64 << retry_count.min(16));
        let jitter_ms = rand::rng().random_range(0..base_ms.max(1));
        Duration::from_millis(exp_ms.saturating_add(jitter_ms).min(cap_ms))
    }

    fn success_result(
        &self,
        image: &ValidatedImage,
        labels: Vec<ModerationLabel>,
        threshold: f32,
        categories: &[String],
        started: Instant,
        retry_count: u32,
    ) -> ModerationResult {
        let is_nsfw = labels
            .iter()
            .any(|label| label.confidence >= threshold && matches_category(label, categories));
        let confidence_score = labels
            .iter()
            .fold(0.0f32, |max, label| max.max(label.confidence))
            .clamp(0.0, 100.0);

        ModerationResult {
            image_id: image.id.clone(),
            is_nsfw,
            labels,
            confidence_score,
            processing_time_ms: started.elapsed().as_millis() as u64,
            retry_count,
            error: None,
        }
    }
}

/// Case-insensitive substring match of a label's name or parent against
/// the NSFW category set
fn matches_category(label: &ModerationLabel, categories: &[String]) -> bool {
    let name = label.name.to_lowercase();
    let parent = label.parent_name.as_deref().map(str::to_lowercase);

    categories.iter().any(|category| {
        let category = category.to_lowercase();
        name.contains(&category)
            || category.contains(&name)
            || parent
                .as_deref()
                .is_some_and(|p| p.contains(&category) || category.contains(p))
    })
}
