use crate::batch_orchestrator::BatchOrchestrator;
use crate::circuit_breaker::CircuitBreaker;
use crate::concurrency_manager::AdaptiveConcurrencyManager;
use crate::rate_limiter::SlidingWindowRateLimiter;
use crate::types::{
    BatchModerationResponse, ImagePayload, ModerationRequestBody, ModerationResult,
    ModerationSettings, RateLimitInfo,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared handler state; the limiter, breaker, and concurrency manager
/// are the same instances the orchestrator mutates.
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub concurrency_manager: Arc<AdaptiveConcurrencyManager>,
    pub credentials_configured: bool,
    /// Deadline for one whole HTTP request
    pub request_timeout: Duration,
    pub max_image_bytes: usize,
}

/// Structured error envelope for request-level failures
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
}

/// Legacy flat response: the single result's fields at the top level,
/// no batch envelope. Older app builds depend on this shape exactly.
#[derive(Debug, Serialize)]
pub struct SingleModerationResponse {
    #[serde(flatten)]
    pub result: ModerationResult,
    pub rate_limit_info: RateLimitInfo,
}

fn error_response(
    status: StatusCode,
    error: &str,
    details: &str,
    kind: &str,
    request_id: &str,
) -> Response {
    let body = ErrorResponse {
        error: error.to_string(),
        details: details.to_string(),
        kind: kind.to_string(),
        request_id: request_id.to_string(),
    };
    (status, Json(body)).into_response()
}

pub async fn moderate_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4().to_string();

    if !state.credentials_configured {
        warn!("moderation request {} rejected: credentials not configured", request_id);
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Moderation service is not configured",
            "missing moderation API credentials",
            "ConfigurationError",
            &request_id,
        );
    }

    // Admission check: a saturated window rejects the envelope up front
    // with a Retry-After hint; admitted batches queue cooperatively.
    if !state.rate_limiter.can_make_request().await {
        let retry_after = state.rate_limiter.retry_after().await;
        let retry_secs = retry_after.as_secs().max(1);
        let mut response = error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            &format!("local rate limiter saturated, retry in {retry_secs}s"),
            "RateLimitExceeded",
            &request_id,
        );
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
        return response;
    }

    // An open breaker fails the whole envelope fast; once the recovery
    // window has elapsed the request is admitted so the probe can run.
    if !state.circuit_breaker.is_call_permitted() {
        warn!("moderation request {} rejected: circuit breaker open", request_id);
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Moderation dependency unavailable",
            "circuit breaker is open, failing fast without calling the dependency",
            "CircuitOpenError",
            &request_id,
        );
    }

    let parsed: ModerationRequestBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid request body",
                &e.to_string(),
                "ValidationError",
                &request_id,
            )
        }
    };

    match parsed {
        ModerationRequestBody::Single(single) => {
            info!(
                "request {}: legacy single-image moderation for {}",
                request_id, single.image_id
            );
            let batch_id = format!("single_{}", single.image_id);
            let images = vec![ImagePayload {
                image_id: single.image_id,
                image_base64: single.image_base64,
            }];

            let response = match run_batch(&state, batch_id, images, None, &request_id).await {
                Ok(response) => response,
                Err(error) => return error,
            };

            let rate_limit_info = response.rate_limit_info;
            match response.results.into_iter().next() {
                Some(result) => Json(SingleModerationResponse {
                    result,
                    rate_limit_info,
                })
                .into_response(),
                None => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Moderation produced no result",
                    "empty result set for single-image request",
                    "InternalError",
                    &request_id,
                ),
            }
        }
        ModerationRequestBody::Batch(batch) => {
            if batch.images.is_empty() {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid request body",
                    "images must not be empty",
                    "ValidationError",
                    &request_id,
                );
            }

            let batch_id = batch
                .batch_id
                .unwrap_or_else(|| format!("batch_{}", Uuid::new_v4()));
            info!(
                "request {}: batch {} with {} images",
                request_id,
                batch_id,
                batch.images.len()
            );

            match run_batch(&state, batch_id, batch.images, batch.settings, &request_id).await {
                Ok(response) => Json(response).into_response(),
                Err(error) => error,
            }
        }
    }
}

async fn run_batch(
    state: &AppState,
    batch_id: String,
    images: Vec<ImagePayload>,
    settings: Option<ModerationSettings>,
    request_id: &str,
) -> Result<BatchModerationResponse, Response> {
    match timeout(
        state.request_timeout,
        state.orchestrator.process_batch(batch_id, images, settings),
    )
    .await
    {
        Ok(response) => Ok(response),
        Err(_) => {
            warn!("request {} exceeded the whole-request deadline", request_id);
            Err(error_response(
                StatusCode::GATEWAY_TIMEOUT,
                "Request timed out",
                &format!("no response within {:?}", state.request_timeout),
                "RequestTimeout",
                request_id,
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthConfigSnapshot {
    pub rate_limit_max_requests: usize,
    pub rate_limit_window_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_ms: u64,
    pub circuit_state: String,
    pub concurrency_min: usize,
    pub concurrency_max: usize,
    pub concurrency_current: usize,
    pub max_retries: u32,
    pub per_image_timeout_ms: u64,
    pub batch_timeout_ms: u64,
    pub max_image_bytes: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub credentials_configured: bool,
    pub config: HealthConfigSnapshot,
}

/// Liveness plus a config snapshot. No secrets.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let limiter_config = state.rate_limiter.config();
    let breaker_config = state.circuit_breaker.config();
    let manager_config = state.concurrency_manager.config();
    let orchestrator_config = state.orchestrator.config();

    Json(HealthResponse {
        status: "ok",
        credentials_configured: state.credentials_configured,
        config: HealthConfigSnapshot {
            rate_limit_max_requests: limiter_config.max_requests,
            rate_limit_window_ms: limiter_config.window.as_millis() as u64,
            circuit_failure_threshold: breaker_config.failure_threshold,
            circuit_recovery_ms: breaker_config.recovery_time.as_millis() as u64,
            circuit_state: state.circuit_breaker.state().to_string(),
            concurrency_min: manager_config.min_concurrency,
            concurrency_max: manager_config.max_concurrency,
            concurrency_current: state.concurrency_manager.concurrency(),
            max_retries: state.max_retries(),
            per_image_timeout_ms: state.per_image_timeout_ms(),
            batch_timeout_ms: orchestrator_config.batch_timeout.as_millis() as u64,
            max_image_bytes: state.max_image_bytes,
        },
    })
}

impl AppState {
    fn max_retries(&self) -> u32 {
        self.retry_config().max_retries
    }

    fn per_image_timeout_ms(&self) -> u64 {
        self.retry_config().per_image_timeout.as_millis() as u64
    }

    fn retry_config(&self) -> &crate::retry_executor::RetryExecutorConfig {
        self.orchestrator.retry_executor_config()
    }
}
