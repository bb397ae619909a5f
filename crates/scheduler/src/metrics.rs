use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timing and counts for a single executed batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMetrics {
    pub index: usize,
    pub activities: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration: Duration,
    /// Set when the backend answered with a hard failure.
    pub hard_failure: bool,
}

/// Run-level metrics collected by the executor.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub batches: Vec<BatchMetrics>,
    /// Average batch duration, updated incrementally.
    pub avg_batch_duration: Duration,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            batches: Vec::new(),
            avg_batch_duration: Duration::ZERO,
        }
    }
}

impl RunMetrics {
    /// Record a batch that returned results (fully or partially successful).
    pub fn record_batch(&mut self, index: usize, succeeded: usize, failed: usize, duration: Duration) {
        self.push(BatchMetrics {
            index,
            activities: succeeded + failed,
            succeeded,
            failed,
            duration,
            hard_failure: false,
        });
    }

    /// Record a batch whose backend call failed outright.
    pub fn record_hard_failure(&mut self, index: usize, activities: usize, duration: Duration) {
        self.push(BatchMetrics {
            index,
            activities,
            succeeded: 0,
            failed: 0,
            duration,
            hard_failure: true,
        });
    }

    fn push(&mut self, batch: BatchMetrics) {
        let count = self.batches.len() as f64 + 1.0;
        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let prev = self.avg_batch_duration.as_nanos() as f64;
        let cur = batch.duration.as_nanos() as f64;
        self.avg_batch_duration = Duration::from_nanos((prev + (cur - prev) / count) as u64);
        self.batches.push(batch);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> usize {
        self.batches.iter().map(|b| b.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().map(|b| b.failed).sum()
    }

    pub fn total_duration(&self) -> Duration {
        self.batches.iter().map(|b| b.duration).sum()
    }
}
