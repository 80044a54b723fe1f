pub mod batch_orchestrator;
pub mod circuit_breaker;
pub mod concurrency_manager;
pub mod image_validator;
pub mod moderation_handler;
pub mod moderation_provider;
pub mod performance_monitor;
pub mod rate_limiter;
pub mod retry_executor;
pub mod types;

#[cfg(test)]
mod tests;

pub use batch_orchestrator::{BatchOrchestrator, BatchOrchestratorConfig};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitOpenError, CircuitState,
};
pub use concurrency_manager::{
    AdaptiveConcurrencyManager, ConcurrencyManagerConfig, ConcurrencySnapshot,
};
pub use image_validator::{
    ImageValidationError, ImageValidator, ImageValidatorConfig, ValidatedImage,
};
pub use moderation_handler::{health_handler, moderate_handler, AppState};
pub use moderation_provider::{
    HttpModerationProvider, HttpModerationProviderConfig, ModerationProvider, ProviderError,
};
pub use performance_monitor::PerformanceMonitor;
pub use rate_limiter::{RateLimiterConfig, SlidingWindowRateLimiter};
pub use retry_executor::{RetryExecutor, RetryExecutorConfig};
pub use types::{
    BatchModerationRequest, BatchModerationResponse, ImagePayload, ModerationLabel,
    ModerationRequestBody, ModerationResult, ModerationSettings, RateLimitInfo,
    SingleModerationRequest,
};
