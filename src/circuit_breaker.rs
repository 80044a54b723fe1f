//! Circuit breaker for the moderation dependency.
//!
//! Closed → Open after `failure_threshold` consecutive failures;
//! Open → Half-Open after `recovery_time`, admitting exactly one probe;
//! probe success closes the breaker, probe failure reopens it and
//! resets the trip timer.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
pub struct CircuitOpenError {
    pub retry_in: Duration,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circuit breaker open: moderation dependency unhealthy, retry in {:?}",
            self.retry_in
        )
    }
}

impl Error for CircuitOpenError {}

/// Failure of a call executed through the breaker: either the breaker
/// rejected it up front, or the call itself failed.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    Open(CircuitOpenError),
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerError::Open(e) => write!(f, "{e}"),
            CircuitBreakerError::Inner(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker trips
    pub failure_threshold: u32,
    /// How long an open breaker rejects before allowing a probe
    pub recovery_time: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// One instance per dependency endpoint, shared across all batches for
/// the process lifetime.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().unwrap().consecutive_failures
    }

    /// Read-only admission probe: would a call be allowed right now?
    /// Does not transition state, so an elapsed recovery window still
    /// reports true and leaves the half-open transition to `execute`.
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => inner
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.config.recovery_time)
                .unwrap_or(true),
        }
    }

    /// Admission check. An open breaker whose recovery window has
    /// elapsed transitions to half-open here, and the calling task
    /// becomes the single probe; everyone else keeps failing fast until
    /// the probe reports back.
    fn check(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.recovery_time {
                    debug!("circuit breaker recovery window elapsed, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        retry_in: self.config.recovery_time - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => Err(CircuitOpenError {
                retry_in: self.config.recovery_time,
            }),
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            debug!("circuit breaker closing after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "circuit breaker tripped after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
        }
    }

    /// Run `operation` through the breaker. A rejected call returns
    /// `Open` without touching the dependency; otherwise the outcome is
    /// recorded and any failure comes back as `Inner`.
    ///
    /// The operation must embed its own timeout: the breaker only sees
    /// outcomes of futures that run to completion.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(open) = self.check() {
            return Err(CircuitBreakerError::Open(open));
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }
}
