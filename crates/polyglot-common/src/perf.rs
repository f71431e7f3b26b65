//! Stage timing for compiles, graph passes and worker round trips.

use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds on a process-wide monotonic clock.
///
/// Only differences between two readings mean anything.
pub fn now() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

/// Logs the time since it was created, under `stage`, when dropped.
///
/// Suits async stages where the work doesn't fit in a closure.
pub struct TimingGuard {
    stage: &'static str,
    start: f64,
}

impl TimingGuard {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            start: now(),
        }
    }

    pub fn elapsed(&self) -> f64 {
        now() - self.start
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        tracing::debug!(stage = self.stage, elapsed_ms = self.elapsed(), "stage finished");
    }
}
