//! Round-trip latency tracking over a bounded rolling window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Sent chunks kept for round-trip correlation before being dropped
const MAX_PENDING: usize = 256;

/// Caller-facing latency figures
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    /// Most recent round trip, in milliseconds
    pub current_ms: u64,
    /// Rolling average over the window, in milliseconds
    pub average_ms: u64,
    /// Worst sample in the window, in milliseconds
    pub max_ms: u64,
}

/// Tracks per-chunk round trips and warns when the rolling average exceeds
/// the configured budget
#[derive(Debug)]
pub struct LatencyTracker {
    window: VecDeque<Duration>,
    capacity: usize,
    budget: Duration,
    pending: HashMap<Uuid, Instant>,
}

impl LatencyTracker {
    /// Create a tracker keeping the last `capacity` samples against `budget`
    #[must_use]
    pub fn new(capacity: usize, budget: Duration) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            budget,
            pending: HashMap::new(),
        }
    }

    /// Register a chunk that just went out. Pending entries are bounded;
    /// the oldest is evicted when the correlation map is full.
    pub fn chunk_sent(&mut self, chunk_id: Uuid, captured_at: Instant) {
        if self.pending.len() >= MAX_PENDING {
            if let Some(oldest) = self
                .pending
                .iter()
                .min_by_key(|(_, sent)| **sent)
                .map(|(id, _)| *id)
            {
                self.pending.remove(&oldest);
            }
        }
        self.pending.insert(chunk_id, captured_at);
    }

    /// Observe a chunk's round trip; returns the measured duration if the
    /// chunk was pending
    pub fn observe(&mut self, chunk_id: Uuid) -> Option<Duration> {
        let captured_at = self.pending.remove(&chunk_id)?;
        let rtt = captured_at.elapsed();
        self.record(rtt);
        Some(rtt)
    }

    /// Push a round-trip sample into the rolling window
    pub fn record(&mut self, rtt: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(rtt);
    }

    /// Rolling average over the window; `None` until the first sample
    #[must_use]
    pub fn average(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        let total: Duration = self.window.iter().sum();
        Some(total / u32::try_from(self.window.len()).unwrap_or(u32::MAX))
    }

    /// Whether the rolling average currently exceeds the budget
    #[must_use]
    pub fn over_budget(&self) -> bool {
        self.average().is_some_and(|avg| avg > self.budget)
    }

    /// Configured latency budget
    #[must_use]
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Point-in-time stats for the caller
    #[must_use]
    pub fn stats(&self) -> LatencyStats {
        let to_ms = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        LatencyStats {
            current_ms: self.window.back().copied().map_or(0, to_ms),
            average_ms: self.average().map_or(0, to_ms),
            max_ms: self.window.iter().max().copied().map_or(0, to_ms),
        }
    }

    /// Drop all unobserved chunks (stream teardown)
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Number of sent chunks awaiting a round-trip observation
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
