use crate::types::RateLimitInfo;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Calls allowed inside one rolling window
    pub max_requests: usize,
    /// Width of the rolling window
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_millis(1000),
        }
    }
}

/// Sliding-window rate limiter for the moderation dependency.
///
/// Keeps the timestamps of recent calls and prunes anything older than
/// the window on every query. One shared instance per dependency
/// endpoint, alive for the whole process; every concurrently-running
/// task goes through the same mutex.
pub struct SlidingWindowRateLimiter {
    config: RateLimiterConfig,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn prune(timestamps: &mut VecDeque<Instant>, window: Duration) {
        let now = Instant::now();
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether a call can go out right now without breaching the window
    pub async fn can_make_request(&self) -> bool {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, self.config.window);
        timestamps.len() < self.config.max_requests
    }

    /// Record an outbound call at the current instant
    pub async fn record_request(&self) {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, self.config.window);
        timestamps.push_back(Instant::now());
    }

    /// Cooperatively wait until the window has capacity.
    ///
    /// Polls in bounded sleeps of window/10 rather than spinning; the
    /// lock is never held across a sleep.
    pub async fn wait_for_availability(&self) {
        let poll_interval = (self.config.window / 10).max(Duration::from_millis(1));
        loop {
            if self.can_make_request().await {
                return;
            }
            debug!(
                "rate limiter saturated, sleeping {:?} before re-check",
                poll_interval
            );
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Calls still available in the current window
    pub async fn remaining_requests(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, self.config.window);
        self.config.max_requests.saturating_sub(timestamps.len())
    }

    /// How long until a saturated window frees a slot. Zero when a call
    /// can already go out.
    pub async fn retry_after(&self) -> Duration {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, self.config.window);
        if timestamps.len() < self.config.max_requests {
            return Duration::ZERO;
        }
        match timestamps.front() {
            Some(oldest) => {
                (*oldest + self.config.window).saturating_duration_since(Instant::now())
            }
            None => Duration::ZERO,
        }
    }

    /// Wall-clock instant at which the oldest in-window call expires
    pub async fn reset_time(&self) -> DateTime<Utc> {
        let mut timestamps = self.timestamps.lock().await;
        Self::prune(&mut timestamps, self.config.window);
        match timestamps.front() {
            Some(oldest) => {
                let ready_in =
                    (*oldest + self.config.window).saturating_duration_since(Instant::now());
                Utc::now()
                    + chrono::Duration::from_std(ready_in).unwrap_or_else(|_| chrono::Duration::zero())
            }
            None => Utc::now(),
        }
    }

    /// Snapshot for caller-facing rate-limit headers
    pub async fn info(&self) -> RateLimitInfo {
        RateLimitInfo {
            remaining_requests: self.remaining_requests().await,
            reset_time: self.reset_time().await.to_rfc3339(),
        }
    }
}
