use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConcurrencyManagerConfig {
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    /// Starting point, clamped into `[min, max]`
    pub initial_concurrency: usize,
    /// Latency the dependency is expected to sustain
    pub target_response_time_ms: f64,
    /// EWMA smoothing factor for the rolling metrics
    pub smoothing_factor: f64,
}

impl Default for ConcurrencyManagerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: 2,
            max_concurrency: 8,
            initial_concurrency: 4,
            target_response_time_ms: 2000.0,
            smoothing_factor: 0.3,
        }
    }
}

#[derive(Debug)]
struct ConcurrencyState {
    current: usize,
    success_rate: f64,
    avg_response_time_ms: f64,
}

/// Read-only view of the manager for diagnostics
#[derive(Debug, Clone)]
pub struct ConcurrencySnapshot {
    pub current: usize,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

/// Tunes the chunk size of the batch orchestrator from observed
/// dependency health. A fixed worker count either underuses a healthy
/// dependency or floods a struggling one; this keeps throughput tracking
/// what the dependency can actually sustain.
pub struct AdaptiveConcurrencyManager {
    config: ConcurrencyManagerConfig,
    state: Mutex<ConcurrencyState>,
}

impl AdaptiveConcurrencyManager {
    pub fn new(config: ConcurrencyManagerConfig) -> Self {
        let current = config
            .initial_concurrency
            .clamp(config.min_concurrency, config.max_concurrency);
        Self {
            state: Mutex::new(ConcurrencyState {
                current,
                success_rate: 1.0,
                avg_response_time_ms: 0.0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &ConcurrencyManagerConfig {
        &self.config
    }

    /// Chunk size for the next slice of the batch
    pub fn concurrency(&self) -> usize {
        self.state.lock().unwrap().current
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        let state = self.state.lock().unwrap();
        ConcurrencySnapshot {
            current: state.current,
            success_rate: state.success_rate,
            avg_response_time_ms: state.avg_response_time_ms,
        }
    }

    /// Fold one chunk's observations into the rolling metrics and
    /// re-derive the concurrency level.
    ///
    /// Rules, in priority order: a success rate under 0.9 backs off
    /// multiplicatively (×0.8); a rate over 0.95 with latency under
    /// target steps up by one; latency over 1.5× target steps down by
    /// one; otherwise the level holds. The result never leaves
    /// `[min, max]`.
    pub fn update_metrics(&self, success_count: usize, total_count: usize, avg_response_time_ms: f64) {
        if total_count == 0 {
            return;
        }

        let observed_rate = success_count as f64 / total_count as f64;
        let alpha = self.config.smoothing_factor;

        let mut state = self.state.lock().unwrap();
        state.success_rate = alpha * observed_rate + (1.0 - alpha) * state.success_rate;
        state.avg_response_time_ms = if state.avg_response_time_ms == 0.0 {
            avg_response_time_ms
        } else {
            alpha * avg_response_time_ms + (1.0 - alpha) * state.avg_response_time_ms
        };

        let target = self.config.target_response_time_ms;
        let before = state.current;

        if state.success_rate < 0.9 {
            state.current = ((state.current as f64 * 0.8).floor() as usize)
                .max(self.config.min_concurrency);
        } else if state.success_rate > 0.95 && state.avg_response_time_ms < target {
            state.current = (state.current + 1).min(self.config.max_concurrency);
        } else if state.avg_response_time_ms > 1.5 * target {
            state.current = state
                .current
                .saturating_sub(1)
                .max(self.config.min_concurrency);
        }

        if state.current != before {
            debug!(
                "adaptive concurrency {} -> {} (success_rate={:.3}, avg_response={:.0}ms)",
                before, state.current, state.success_rate, state.avg_response_time_ms
            );
        }
    }
}
