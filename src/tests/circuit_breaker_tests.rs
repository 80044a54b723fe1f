use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};
use crate::moderation_provider::ProviderError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn breaker(failure_threshold: u32, recovery_ms: u64) -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold,
        recovery_time: Duration::from_millis(recovery_ms),
    })
}

fn outage() -> ProviderError {
    ProviderError::ServiceUnavailable("test outage".to_string())
}

async fn fail(breaker: &CircuitBreaker) {
    let result = breaker
        .execute(|| async { Err::<(), ProviderError>(outage()) })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_starts_closed() {
    let breaker = breaker(5, 1000);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_success_passes_through() {
    let breaker = breaker(5, 1000);
    let result = breaker
        .execute(|| async { Ok::<_, ProviderError>(42) })
        .await;
    assert!(matches!(result, Ok(42)));
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_failures_below_threshold_stay_closed() {
    let breaker = breaker(5, 1000);
    for _ in 0..4 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 4);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let breaker = breaker(5, 1000);
    for _ in 0..4 {
        fail(&breaker).await;
    }
    let _ = breaker
        .execute(|| async { Ok::<_, ProviderError>(()) })
        .await;
    assert_eq!(breaker.consecutive_failures(), 0);

    // Four more failures must not trip it after the reset
    for _ in 0..4 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_trips_at_threshold_and_rejects_without_calling() {
    let breaker = breaker(3, 60_000);
    for _ in 0..3 {
        fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let attempted = Arc::new(AtomicUsize::new(0));
    let attempted_clone = attempted.clone();
    let result = breaker
        .execute(|| async move {
            attempted_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>(())
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    assert_eq!(attempted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_probe_success_closes_breaker() {
    let breaker = breaker(2, 50);
    fail(&breaker).await;
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = breaker
        .execute(|| async { Ok::<_, ProviderError>("recovered") })
        .await;
    assert!(matches!(result, Ok("recovered")));
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_probe_failure_reopens_breaker() {
    let breaker = breaker(2, 50);
    fail(&breaker).await;
    fail(&breaker).await;

    tokio::time::sleep(Duration::from_millis(80)).await;

    // The probe itself fails
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    // Trip timer was reset: still rejecting right after the probe
    let result = breaker
        .execute(|| async { Ok::<_, ProviderError>(()) })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
}

#[tokio::test]
async fn test_is_call_permitted_reflects_state_without_transitioning() {
    let breaker = breaker(1, 40);
    assert!(breaker.is_call_permitted());

    fail(&breaker).await;
    assert!(!breaker.is_call_permitted());
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(breaker.is_call_permitted());
    // The read-only probe must not move the breaker to half-open
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn test_half_open_admits_exactly_one_probe() {
    let breaker = Arc::new(breaker(1, 40));
    fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(60)).await;

    // First caller becomes the probe and holds the slot until its call
    // resolves; a concurrent caller must fail fast meanwhile.
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let probe_breaker = breaker.clone();
    let probe = tokio::spawn(async move {
        probe_breaker
            .execute(|| async {
                rx.await.ok();
                Ok::<_, ProviderError>(())
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    let concurrent = breaker
        .execute(|| async { Ok::<_, ProviderError>(()) })
        .await;
    assert!(matches!(concurrent, Err(CircuitBreakerError::Open(_))));

    tx.send(()).unwrap();
    assert!(probe.await.unwrap().is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);
}
