//! Batch orchestrator: validate everything, process valid images in
//! adaptively-sized chunks, merge validation failures back in, and emit
//! the aggregate response.

use crate::concurrency_manager::AdaptiveConcurrencyManager;
use crate::image_validator::{ImageValidator, ValidatedImage};
use crate::performance_monitor::PerformanceMonitor;
use crate::rate_limiter::SlidingWindowRateLimiter;
use crate::retry_executor::RetryExecutor;
use crate::types::{
    BatchModerationResponse, ImagePayload, ModerationResult, ModerationSettings,
};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct BatchOrchestratorConfig {
    /// Deadline for the whole Process phase
    pub batch_timeout: Duration,
    /// Pause between chunks so the dependency is not hammered
    pub inter_chunk_delay: Duration,
    /// Emit a memory-cleanup hint every this many processed images
    pub cleanup_interval: usize,
}

impl Default for BatchOrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_secs(180),
            inter_chunk_delay: Duration::from_millis(50),
            cleanup_interval: 50,
        }
    }
}

pub struct BatchOrchestrator {
    config: BatchOrchestratorConfig,
    validator: ImageValidator,
    retry_executor: Arc<RetryExecutor>,
    concurrency_manager: Arc<AdaptiveConcurrencyManager>,
    rate_limiter: Arc<SlidingWindowRateLimiter>,
}

impl BatchOrchestrator {
    pub fn new(
        config: BatchOrchestratorConfig,
        validator: ImageValidator,
        retry_executor: Arc<RetryExecutor>,
        concurrency_manager: Arc<AdaptiveConcurrencyManager>,
        rate_limiter: Arc<SlidingWindowRateLimiter>,
    ) -> Self {
        Self {
            config,
            validator,
            retry_executor,
            concurrency_manager,
            rate_limiter,
        }
    }

    pub fn config(&self) -> &BatchOrchestratorConfig {
        &self.config
    }

    pub fn retry_executor_config(&self) -> &crate::retry_executor::RetryExecutorConfig {
        self.retry_executor.config()
    }

    /// Process one batch end to end. Always returns exactly one result
    /// per input image, whatever fails along the way.
    pub async fn process_batch(
        &self,
        batch_id: String,
        images: Vec<ImagePayload>,
        settings: Option<ModerationSettings>,
    ) -> BatchModerationResponse {
        let mut monitor = PerformanceMonitor::new();
        let total_images = images.len();

        info!("processing batch {} with {} images", batch_id, total_images);

        // Validate phase: every image, concurrently; failures become data
        let validations = join_all(images.iter().map(|image| async {
            self.validator.validate(&image.image_id, &image.image_base64)
        }))
        .await;

        let mut valid: VecDeque<ValidatedImage> = VecDeque::new();
        let mut invalid: Vec<(String, String)> = Vec::new();
        for (image, outcome) in images.iter().zip(validations) {
            match outcome {
                Ok(validated) => valid.push_back(validated),
                Err(e) => invalid.push((image.image_id.clone(), e.to_string())),
            }
        }
        monitor.checkpoint("validate");

        if !invalid.is_empty() {
            debug!(
                "batch {}: {} of {} images failed validation",
                batch_id,
                invalid.len(),
                total_images
            );
        }

        // Process phase, bounded by the batch deadline
        let deadline = Instant::now() + self.config.batch_timeout;
        let mut results = self
            .process_valid_images(&batch_id, valid, settings.as_ref(), deadline)
            .await;
        monitor.checkpoint("process");

        // Merge phase: validation failures are appended after processed
        // results; callers correlate by image_id
        for (image_id, error) in invalid {
            results.push(ModerationResult::failure(
                image_id,
                format!("Image validation failed: {error}"),
            ));
        }
        monitor.checkpoint("merge");

        let successful = results.iter().filter(|r| r.error.is_none()).count();
        let failed = total_images - successful;
        let total_ms = monitor.elapsed_ms();

        info!(
            "batch {} complete: {} successful, {} failed in {}ms",
            batch_id, successful, failed, total_ms
        );

        BatchModerationResponse {
            batch_id,
            total_images,
            successful,
            failed,
            results,
            total_processing_time_ms: total_ms,
            average_processing_time_ms: total_ms as f64 / total_images.max(1) as f64,
            throughput_images_per_second: monitor.throughput(total_images),
            rate_limit_info: self.rate_limiter.info().await,
        }
    }

    /// Chunked fan-out over the valid images. Each chunk runs exactly
    /// `concurrency` calls in flight; chunk metrics feed the adaptive
    /// concurrency manager before the next chunk is sized.
    async fn process_valid_images(
        &self,
        batch_id: &str,
        mut queue: VecDeque<ValidatedImage>,
        settings: Option<&ModerationSettings>,
        deadline: Instant,
    ) -> Vec<ModerationResult> {
        let total = queue.len();
        let mut results = Vec::with_capacity(total);
        let mut success_count = 0usize;
        let mut processed = 0usize;

        while !queue.is_empty() {
            let remaining_time = deadline.saturating_duration_since(Instant::now());
            if remaining_time.is_zero() {
                warn!(
                    "batch {} deadline reached with {} images unprocessed",
                    batch_id,
                    queue.len()
                );
                results.extend(queue.drain(..).map(|image| timeout_result(&image.id)));
                break;
            }

            let mut concurrency = self.concurrency_manager.concurrency();
            if let Some(cap) = settings.and_then(|s| s.max_concurrent) {
                concurrency = concurrency.min(cap.max(1));
            }

            let take = concurrency.min(queue.len());
            let chunk: Vec<ValidatedImage> = queue.drain(..take).collect();
            let chunk_started = Instant::now();

            let chunk_futures = chunk
                .iter()
                .map(|image| self.retry_executor.execute(image, settings));

            let chunk_results = match timeout(remaining_time, join_all(chunk_futures)).await {
                Ok(r) => r,
                Err(_) => {
                    warn!(
                        "batch {} deadline fired mid-chunk, synthesizing timeout results",
                        batch_id
                    );
                    results.extend(chunk.iter().map(|image| timeout_result(&image.id)));
                    results.extend(queue.drain(..).map(|image| timeout_result(&image.id)));
                    break;
                }
            };

            let chunk_elapsed = chunk_started.elapsed();
            let chunk_success = chunk_results.iter().filter(|r| r.error.is_none()).count();
            success_count += chunk_success;

            let before = processed;
            processed += chunk.len();
            results.extend(chunk_results);

            let avg_ms = chunk_elapsed.as_millis() as f64 / chunk.len().max(1) as f64;
            self.concurrency_manager
                .update_metrics(success_count, processed, avg_ms);

            debug!(
                "batch {}: chunk of {} done in {:?} ({}/{} processed, {} ok)",
                batch_id,
                chunk.len(),
                chunk_elapsed,
                processed,
                total,
                chunk_success
            );

            // Chunk buffers drop here; flag the milestone for long batches
            if self.config.cleanup_interval > 0
                && before / self.config.cleanup_interval != processed / self.config.cleanup_interval
            {
                debug!(
                    "batch {}: memory cleanup hint at {} processed images",
                    batch_id, processed
                );
            }
            drop(chunk);

            if !queue.is_empty() {
                tokio::time::sleep(self.config.inter_chunk_delay).await;
            }
        }

        results
    }
}

fn timeout_result(image_id: &str) -> ModerationResult {
    ModerationResult::failure(image_id, "Batch timeout: image was not processed")
}
