use std::time::Instant;

/// Stopwatch for response metrics and timing breakdowns. Never affects
/// control flow.
pub struct PerformanceMonitor {
    started: Instant,
    checkpoints: Vec<(String, u64)>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            checkpoints: Vec::new(),
        }
    }

    /// Record elapsed-ms-since-start under a label
    pub fn checkpoint(&mut self, name: &str) {
        self.checkpoints.push((name.to_string(), self.elapsed_ms()));
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Items per second over the elapsed time
    pub fn throughput(&self, item_count: usize) -> f64 {
        let seconds = self.started.elapsed().as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        item_count as f64 / seconds
    }

    pub fn checkpoints(&self) -> &[(String, u64)] {
        &self.checkpoints
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
