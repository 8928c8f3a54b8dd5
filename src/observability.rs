use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one procedure run
#[derive(Debug, Default)]
pub struct ProcedureMetrics {
    pub detections: AtomicU64,
    pub ignored_detections: AtomicU64,
    pub deferred_attempts: AtomicU64,
    pub attempts_begun: AtomicU64,
    pub aborted_attempts: AtomicU64,
    pub stitches_completed: AtomicU64,
    pub duplicate_completions: AtomicU64,
}

impl ProcedureMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored_detection(&self) {
        self.ignored_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred_attempt(&self) {
        self.deferred_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt_begun(&self) {
        self.attempts_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_attempt(&self) {
        self.aborted_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stitch_completed(&self) {
        self.stitches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_completion(&self) {
        self.duplicate_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.detections,
            &self.ignored_detections,
            &self.deferred_attempts,
            &self.attempts_begun,
            &self.aborted_attempts,
            &self.stitches_completed,
            &self.duplicate_completions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn get_stats(&self) -> ProcedureStats {
        ProcedureStats {
            detections: self.detections.load(Ordering::Relaxed),
            ignored_detections: self.ignored_detections.load(Ordering::Relaxed),
            deferred_attempts: self.deferred_attempts.load(Ordering::Relaxed),
            attempts_begun: self.attempts_begun.load(Ordering::Relaxed),
            aborted_attempts: self.aborted_attempts.load(Ordering::Relaxed),
            stitches_completed: self.stitches_completed.load(Ordering::Relaxed),
            duplicate_completions: self.duplicate_completions.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Procedure metrics: detections={}, ignored={}, deferred={}, begun={}, aborted={}, completed={}, duplicates={}",
            stats.detections,
            stats.ignored_detections,
            stats.deferred_attempts,
            stats.attempts_begun,
            stats.aborted_attempts,
            stats.stitches_completed,
            stats.duplicate_completions
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcedureStats {
    pub detections: u64,
    pub ignored_detections: u64,
    pub deferred_attempts: u64,
    pub attempts_begun: u64,
    pub aborted_attempts: u64,
    pub stitches_completed: u64,
    pub duplicate_completions: u64,
}

/// Time an operation against the wall clock and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = millis(duration),
            "Operation completed"
        );
        duration
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let metrics = ProcedureMetrics::new();
        metrics.record_detection();
        metrics.record_detection();
        metrics.record_deferred_attempt();
        metrics.record_stitch_completed();

        let stats = metrics.get_stats();
        assert_eq!(stats.detections, 2);
        assert_eq!(stats.deferred_attempts, 1);
        assert_eq!(stats.stitches_completed, 1);

        metrics.reset();
        assert_eq!(metrics.get_stats(), ProcedureStats::default());
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
