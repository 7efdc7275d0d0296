//! Pool metrics: counters folded into a snapshot on a fixed cadence.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Point-in-time view of pool behavior, recomputed on the metrics tick
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Total tasks accepted by the queue
    pub submitted: u64,
    /// Tasks resolved successfully
    pub completed: u64,
    /// Tasks resolved as failed (processor errors, unit deaths)
    pub failed: u64,
    /// Tasks resolved by deadline expiry
    pub timed_out: u64,
    /// Completed tasks per second since startup
    pub throughput: f64,
    /// Mean processing time across completed tasks, in milliseconds
    pub avg_processing_ms: f64,
    /// Live queue depth at snapshot time
    pub queue_depth: usize,
    /// Units in ready state at snapshot time
    pub ready_units: usize,
    /// Busy units over total units, 0.0–1.0
    pub utilization: f64,
}

/// Accumulates lifecycle counters and produces snapshots
#[derive(Debug)]
pub struct MetricsAggregator {
    started: Instant,
    submitted: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
    total_processing: Duration,
    snapshot: MetricsSnapshot,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create an aggregator with all counters zeroed
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            submitted: 0,
            completed: 0,
            failed: 0,
            timed_out: 0,
            total_processing: Duration::ZERO,
            snapshot: MetricsSnapshot::default(),
        }
    }

    /// Count an accepted submission
    pub const fn task_submitted(&mut self) {
        self.submitted += 1;
    }

    /// Count a successful completion
    pub const fn task_completed(&mut self, elapsed: Duration) {
        self.completed += 1;
        self.total_processing = match self.total_processing.checked_add(elapsed) {
            Some(total) => total,
            None => Duration::MAX,
        };
    }

    /// Count a failed resolution
    pub const fn task_failed(&mut self) {
        self.failed += 1;
    }

    /// Count a timeout resolution
    pub const fn task_timed_out(&mut self) {
        self.timed_out += 1;
    }

    /// Recompute the cached snapshot from current pool state
    #[allow(clippy::cast_precision_loss)]
    pub fn recompute(&mut self, queue_depth: usize, ready: usize, busy: usize, total: usize) {
        let uptime = self.started.elapsed().as_secs_f64().max(f64::EPSILON);
        self.snapshot = MetricsSnapshot {
            submitted: self.submitted,
            completed: self.completed,
            failed: self.failed,
            timed_out: self.timed_out,
            throughput: self.completed as f64 / uptime,
            avg_processing_ms: if self.completed == 0 {
                0.0
            } else {
                self.total_processing.as_secs_f64() * 1_000.0 / self.completed as f64
            },
            queue_depth,
            ready_units: ready,
            utilization: if total == 0 {
                0.0
            } else {
                busy as f64 / total as f64
            },
        };
    }

    /// Most recent snapshot
    #[must_use]
    pub const fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let mut agg = MetricsAggregator::new();
        agg.task_submitted();
        agg.task_submitted();
        agg.task_submitted();
        agg.task_completed(Duration::from_millis(100));
        agg.task_completed(Duration::from_millis(300));
        agg.task_failed();

        agg.recompute(1, 2, 1, 4);
        let snap = agg.snapshot();
        assert_eq!(snap.submitted, 3);
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.failed, 1);
        assert!((snap.avg_processing_ms - 200.0).abs() < 1.0);
        assert_eq!(snap.queue_depth, 1);
        assert_eq!(snap.ready_units, 2);
        assert!((snap.utilization - 0.25).abs() < f64::EPSILON);
        assert!(snap.throughput > 0.0);
    }

    #[test]
    fn empty_pool_has_zero_utilization() {
        let mut agg = MetricsAggregator::new();
        agg.recompute(0, 0, 0, 0);
        assert!((agg.snapshot().utilization - 0.0).abs() < f64::EPSILON);
        assert!((agg.snapshot().avg_processing_ms - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timeouts_counted_separately_from_failures() {
        let mut agg = MetricsAggregator::new();
        agg.task_timed_out();
        agg.task_failed();
        agg.recompute(0, 1, 0, 1);
        assert_eq!(agg.snapshot().timed_out, 1);
        assert_eq!(agg.snapshot().failed, 1);
    }
}
