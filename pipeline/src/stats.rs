//! Rolling batch statistics
//!
//! Shared by the batch processor and the point writer: a last-100 window of
//! batch sizes and dispatch durations, plus lifetime counters for throughput
//! and success rate. Snapshots are plain serializable structs so the health
//! surface and tests need no global metrics state.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window length for rolling batch size / duration averages
const ROLLING_WINDOW: usize = 100;

/// Mutable statistics, guarded by the owning component's lock
pub(crate) struct RollingStats {
    started_at: Instant,
    batches_ok: u64,
    batches_failed: u64,
    items_ok: u64,
    items_failed: u64,
    sizes: VecDeque<usize>,
    durations: VecDeque<Duration>,
}

impl RollingStats {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            batches_ok: 0,
            batches_failed: 0,
            items_ok: 0,
            items_failed: 0,
            sizes: VecDeque::with_capacity(ROLLING_WINDOW),
            durations: VecDeque::with_capacity(ROLLING_WINDOW),
        }
    }

    /// Record one dispatched batch
    pub(crate) fn record_batch(&mut self, size: usize, duration: Duration, ok: bool) {
        if self.sizes.len() >= ROLLING_WINDOW {
            self.sizes.pop_front();
        }
        self.sizes.push_back(size);

        if self.durations.len() >= ROLLING_WINDOW {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);

        if ok {
            self.batches_ok += 1;
            self.items_ok += size as u64;
        } else {
            self.batches_failed += 1;
            self.items_failed += size as u64;
        }
    }

    pub(crate) fn snapshot(&self, pending: usize) -> BatchStatistics {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let batches = self.batches_ok + self.batches_failed;
        BatchStatistics {
            batches_processed: self.batches_ok,
            batches_failed: self.batches_failed,
            items_processed: self.items_ok,
            items_failed: self.items_failed,
            pending_items: pending,
            avg_batch_size: if self.sizes.is_empty() {
                0.0
            } else {
                self.sizes.iter().sum::<usize>() as f64 / self.sizes.len() as f64
            },
            avg_batch_duration_ms: if self.durations.is_empty() {
                0.0
            } else {
                self.durations.iter().map(Duration::as_secs_f64).sum::<f64>()
                    / self.durations.len() as f64
                    * 1000.0
            },
            items_per_second: if elapsed > 0.0 {
                (self.items_ok + self.items_failed) as f64 / elapsed
            } else {
                0.0
            },
            success_rate: if batches > 0 {
                self.batches_ok as f64 / batches as f64
            } else {
                1.0
            },
        }
    }
}

/// Point-in-time batching statistics
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatistics {
    /// Batches dispatched successfully
    pub batches_processed: u64,
    /// Batches that exhausted their retries
    pub batches_failed: u64,
    /// Items in successfully dispatched batches
    pub items_processed: u64,
    /// Items in failed batches
    pub items_failed: u64,
    /// Items currently accumulating (not yet flushed)
    pub pending_items: usize,
    /// Rolling (last-100) mean batch size
    pub avg_batch_size: f64,
    /// Rolling (last-100) mean dispatch duration in milliseconds
    pub avg_batch_duration_ms: f64,
    /// Lifetime throughput, items per second
    pub items_per_second: f64,
    /// Successful batches over all dispatched batches (1.0 when idle)
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_caps_at_100() {
        let mut stats = RollingStats::new();
        for i in 0..150 {
            stats.record_batch(i, Duration::from_millis(1), true);
        }
        // Window holds batches 50..150, mean = 99.5
        let snap = stats.snapshot(0);
        assert!((snap.avg_batch_size - 99.5).abs() < 1e-9);
        assert_eq!(snap.batches_processed, 150);
    }

    #[test]
    fn test_success_rate() {
        let mut stats = RollingStats::new();
        stats.record_batch(10, Duration::from_millis(1), true);
        stats.record_batch(10, Duration::from_millis(1), true);
        stats.record_batch(10, Duration::from_millis(1), false);

        let snap = stats.snapshot(0);
        assert!((snap.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.items_processed, 20);
        assert_eq!(snap.items_failed, 10);
    }

    #[test]
    fn test_idle_snapshot_defaults() {
        let snap = RollingStats::new().snapshot(4);
        assert_eq!(snap.success_rate, 1.0);
        assert_eq!(snap.avg_batch_size, 0.0);
        assert_eq!(snap.pending_items, 4);
    }
}
