use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use moderation_pipeline::{
    batch_orchestrator::{BatchOrchestrator, BatchOrchestratorConfig},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    concurrency_manager::{AdaptiveConcurrencyManager, ConcurrencyManagerConfig},
    image_validator::{ImageValidator, ImageValidatorConfig},
    moderation_handler::{health_handler, moderate_handler, AppState},
    moderation_provider::{HttpModerationProvider, HttpModerationProviderConfig},
    rate_limiter::{RateLimiterConfig, SlidingWindowRateLimiter},
    retry_executor::{RetryExecutor, RetryExecutorConfig},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Check if we should enable tokio-console
    if std::env::var("TOKIO_CONSOLE").is_ok() {
        console_subscriber::init();
        info!("tokio-console enabled on port 6669");
    } else {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,moderation_pipeline=debug"));
        fmt().with_env_filter(env_filter).with_target(true).init();
    }

    // Dependency credentials; the server still starts without them so
    // /health can report the misconfiguration
    let api_endpoint = std::env::var("MODERATION_API_URL")
        .unwrap_or_else(|_| "http://localhost:9090/detect-moderation-labels".to_string());
    let api_key = std::env::var("MODERATION_API_KEY").unwrap_or_default();
    let credentials_configured = !api_key.is_empty();
    if !credentials_configured {
        warn!("MODERATION_API_KEY not set, moderation requests will fail with ConfigurationError");
    }

    let rate_limiter_config = RateLimiterConfig {
        max_requests: env_usize("RATE_LIMIT_MAX_REQUESTS", 10),
        window: Duration::from_millis(env_u64("RATE_LIMIT_WINDOW_MS", 1000)),
    };

    let circuit_breaker_config = CircuitBreakerConfig {
        failure_threshold: env_u64("CIRCUIT_FAILURE_THRESHOLD", 5) as u32,
        recovery_time: Duration::from_secs(env_u64("CIRCUIT_RECOVERY_SECS", 30)),
    };

    let concurrency_config = ConcurrencyManagerConfig {
        min_concurrency: env_usize("MIN_CONCURRENCY", 2),
        max_concurrency: env_usize("MAX_CONCURRENCY", 8),
        initial_concurrency: env_usize("INITIAL_CONCURRENCY", 4),
        ..ConcurrencyManagerConfig::default()
    };

    let retry_config = RetryExecutorConfig {
        max_retries: env_u64("MAX_RETRIES", 3) as u32,
        base_backoff: Duration::from_millis(env_u64("RETRY_BASE_BACKOFF_MS", 500)),
        max_backoff: Duration::from_millis(env_u64("RETRY_MAX_BACKOFF_MS", 5000)),
        per_image_timeout: Duration::from_secs(env_u64("PER_IMAGE_TIMEOUT_SECS", 8)),
        confidence_threshold: std::env::var("CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80.0),
        nsfw_categories: std::env::var("NSFW_CATEGORIES")
            .map(|s| s.split(',').map(|c| c.trim().to_string()).collect())
            .unwrap_or_else(|_| RetryExecutorConfig::default().nsfw_categories),
    };

    let orchestrator_config = BatchOrchestratorConfig {
        batch_timeout: Duration::from_secs(env_u64("BATCH_TIMEOUT_SECS", 180)),
        inter_chunk_delay: Duration::from_millis(env_u64("INTER_CHUNK_DELAY_MS", 50)),
        cleanup_interval: env_usize("CLEANUP_INTERVAL_IMAGES", 50),
    };

    let validator_config = ImageValidatorConfig {
        max_bytes: env_usize("MAX_IMAGE_BYTES", 5 * 1024 * 1024),
    };

    let request_timeout = Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 300));

    // Shared, process-lifetime components; one of each per dependency
    // endpoint, injected everywhere instead of living as globals
    let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(rate_limiter_config));
    let circuit_breaker = Arc::new(CircuitBreaker::new(circuit_breaker_config));
    let concurrency_manager = Arc::new(AdaptiveConcurrencyManager::new(concurrency_config));

    let provider = Arc::new(
        HttpModerationProvider::new(HttpModerationProviderConfig {
            endpoint: api_endpoint.clone(),
            api_key,
            request_timeout: Duration::from_secs(env_u64("PROVIDER_HTTP_TIMEOUT_SECS", 10)),
        })
        .map_err(|e| anyhow::anyhow!("failed to build moderation client: {e}"))?,
    );

    let max_image_bytes = validator_config.max_bytes;
    let retry_executor = Arc::new(RetryExecutor::new(
        retry_config,
        provider,
        rate_limiter.clone(),
        circuit_breaker.clone(),
    ));

    let orchestrator = Arc::new(BatchOrchestrator::new(
        orchestrator_config,
        ImageValidator::new(validator_config),
        retry_executor,
        concurrency_manager.clone(),
        rate_limiter.clone(),
    ));

    let state = Arc::new(AppState {
        orchestrator,
        rate_limiter: rate_limiter.clone(),
        circuit_breaker: circuit_breaker.clone(),
        concurrency_manager: concurrency_manager.clone(),
        credentials_configured,
        request_timeout,
        max_image_bytes,
    });

    // Create task tracker and cancellation token for coordinated shutdown
    let cancellation_token = CancellationToken::new();
    let task_tracker = TaskTracker::new();

    // Periodically log pipeline health
    let metrics_token = cancellation_token.clone();
    let metrics_limiter = rate_limiter.clone();
    let metrics_breaker = circuit_breaker.clone();
    let metrics_manager = concurrency_manager.clone();
    task_tracker.spawn(async move {
        let mut metrics_interval = interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = metrics_token.cancelled() => {
                    info!("Pipeline metrics logger cancelled, exiting");
                    break;
                }
                _ = metrics_interval.tick() => {
                    let snapshot = metrics_manager.snapshot();
                    let remaining = metrics_limiter.remaining_requests().await;
                    info!(
                        "Pipeline metrics: circuit={} failures={} concurrency={} success_rate={:.3} avg_response={:.0}ms remaining_requests={}",
                        metrics_breaker.state(),
                        metrics_breaker.consecutive_failures(),
                        snapshot.current,
                        snapshot.success_rate,
                        snapshot.avg_response_time_ms,
                        remaining,
                    );
                }
            }
        }
    });

    // Configure CORS; the layer also answers OPTIONS preflights
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", post(moderate_handler))
        .route("/moderate", post(moderate_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind_addr.parse()?;

    info!("Moderation pipeline starting on {}", addr);
    info!("Moderation API endpoint: {}", api_endpoint);

    // Handle shutdown signal
    let shutdown_token = cancellation_token.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping services...");
        shutdown_token.cancel();
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped, shutting down services...");

    cancellation_token.cancel();
    task_tracker.close();

    match tokio::time::timeout(Duration::from_secs(10), task_tracker.wait()).await {
        Ok(()) => info!("All background tasks completed successfully"),
        Err(_) => {
            error!("Timeout waiting for background tasks to complete");
            std::process::exit(1);
        }
    }

    info!("Clean shutdown complete");

    Ok(())
}
