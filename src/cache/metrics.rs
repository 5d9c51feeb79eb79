//! Cache Metrics Collection
//!
//! Per-tier hit counters, miss and error counters, backfill counters and
//! latency averages for the tiered cache manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,

    // Failures swallowed by the manager
    errors: AtomicU64,

    // Writes
    sets: AtomicU64,
    rejected_sets: AtomicU64,

    // Backfill
    backfills_l2_to_l1: AtomicU64,
    backfills_l3_to_local: AtomicU64,

    // Tier gauges, refreshed by the snapshot task
    l1_size_bytes: AtomicU64,
    l1_entries: AtomicU64,
    l1_evictions: AtomicU64,
    l2_size_bytes: AtomicU64,
    l2_entries: AtomicU64,

    // Operation latencies (microseconds, exponential moving average)
    get_latency_us: AtomicU64,
    set_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l3_hit(&self) {
        self.l3_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self, accepted: bool) {
        if accepted {
            self.sets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected_sets.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_backfill_l2_to_l1(&self) {
        self.backfills_l2_to_l1.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backfill_l3_to_local(&self) {
        self.backfills_l3_to_local.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_l1_stats(&self, size: u64, entries: u64, evictions: u64) {
        self.l1_size_bytes.store(size, Ordering::Relaxed);
        self.l1_entries.store(entries, Ordering::Relaxed);
        self.l1_evictions.store(evictions, Ordering::Relaxed);
    }

    pub fn update_l2_stats(&self, size: u64, entries: u64) {
        self.l2_size_bytes.store(size, Ordering::Relaxed);
        self.l2_entries.store(entries, Ordering::Relaxed);
    }

    pub fn l1_hits(&self) -> u64 {
        self.l1_hits.load(Ordering::Relaxed)
    }

    pub fn l2_hits(&self) -> u64 {
        self.l2_hits.load(Ordering::Relaxed)
    }

    pub fn l3_hits(&self) -> u64 {
        self.l3_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    // Latency tracking
    pub fn record_get_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.get_latency_us, duration);
    }

    pub fn record_set_latency(&self, duration: Duration) {
        Self::update_latency_ema(&self.set_latency_us, duration);
    }

    fn update_latency_ema(target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn get_latency(&self) -> Duration {
        Duration::from_micros(self.get_latency_us.load(Ordering::Relaxed))
    }

    pub fn set_latency(&self) -> Duration {
        Duration::from_micros(self.set_latency_us.load(Ordering::Relaxed))
    }

    /// Hit rate of each tier over all lookups that reached a verdict
    pub fn hit_rate_by_tier(&self) -> TierHitRates {
        let l1 = self.l1_hits();
        let l2 = self.l2_hits();
        let l3 = self.l3_hits();
        let total = l1 + l2 + l3 + self.misses();

        let rate = |hits: u64| {
            if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            }
        };

        TierHitRates {
            l1: rate(l1),
            l2: rate(l2),
            l3: rate(l3),
            overall: rate(l1 + l2 + l3),
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            l1_hits: self.l1_hits(),
            l2_hits: self.l2_hits(),
            l3_hits: self.l3_hits(),
            misses: self.misses(),
            errors: self.errors(),
            hit_rate_by_tier: self.hit_rate_by_tier(),

            sets: self.sets.load(Ordering::Relaxed),
            rejected_sets: self.rejected_sets.load(Ordering::Relaxed),
            backfills_l2_to_l1: self.backfills_l2_to_l1.load(Ordering::Relaxed),
            backfills_l3_to_local: self.backfills_l3_to_local.load(Ordering::Relaxed),

            l1_size_bytes: self.l1_size_bytes.load(Ordering::Relaxed),
            l1_entries: self.l1_entries.load(Ordering::Relaxed),
            l1_evictions: self.l1_evictions.load(Ordering::Relaxed),
            l2_size_bytes: self.l2_size_bytes.load(Ordering::Relaxed),
            l2_entries: self.l2_entries.load(Ordering::Relaxed),

            get_latency_us: self.get_latency().as_micros() as u64,
            set_latency_us: self.set_latency().as_micros() as u64,
        }
    }

    /// Reset all counters. Gauges keep their last observed value.
    pub fn reset(&self) {
        for counter in [
            &self.l1_hits,
            &self.l2_hits,
            &self.l3_hits,
            &self.misses,
            &self.errors,
            &self.sets,
            &self.rejected_sets,
            &self.backfills_l2_to_l1,
            &self.backfills_l3_to_local,
            &self.get_latency_us,
            &self.set_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Fraction of lookups answered by each tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TierHitRates {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub overall: f64,
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    // Lookups
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub hit_rate_by_tier: TierHitRates,

    // Writes and backfill
    pub sets: u64,
    pub rejected_sets: u64,
    pub backfills_l2_to_l1: u64,
    pub backfills_l3_to_local: u64,

    // Tier gauges
    pub l1_size_bytes: u64,
    pub l1_entries: u64,
    pub l1_evictions: u64,
    pub l2_size_bytes: u64,
    pub l2_entries: u64,

    // Latency (EMA, microseconds)
    pub get_latency_us: u64,
    pub set_latency_us: u64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.l1_hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.hit_rate_by_tier(), TierHitRates::default());
    }

    #[test]
    fn test_hit_rate_by_tier() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_l1_hit();
        metrics.record_l2_hit();
        metrics.record_l3_hit();
        metrics.record_miss();

        let rates = metrics.hit_rate_by_tier();
        assert!((rates.l1 - 0.4).abs() < 1e-9);
        assert!((rates.l2 - 0.2).abs() < 1e-9);
        assert!((rates.l3 - 0.2).abs() < 1e-9);
        assert!((rates.overall - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_latency_tracking() {
        let metrics = CacheMetrics::new();

        metrics.record_get_latency(Duration::from_micros(100));
        assert_eq!(metrics.get_latency(), Duration::from_micros(100));

        // EMA should smooth values
        metrics.record_get_latency(Duration::from_micros(200));
        let latency = metrics.get_latency().as_micros();
        assert!(latency > 100 && latency < 200);
    }

    #[test]
    fn test_snapshot() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_error();
        metrics.record_set(true);
        metrics.record_set(false);
        metrics.record_backfill_l2_to_l1();
        metrics.update_l1_stats(1024, 10, 3);
        metrics.update_l2_stats(4096, 20);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l1_hits, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.rejected_sets, 1);
        assert_eq!(snapshot.backfills_l2_to_l1, 1);
        assert_eq!(snapshot.l1_size_bytes, 1024);
        assert_eq!(snapshot.l1_evictions, 3);
        assert_eq!(snapshot.l2_entries, 20);
    }

    #[test]
    fn test_reset_keeps_gauges() {
        let metrics = CacheMetrics::new();

        metrics.record_l1_hit();
        metrics.record_miss();
        metrics.update_l2_stats(10, 1);

        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l1_hits, 0);
        assert_eq!(snapshot.misses, 0);
        assert_eq!(snapshot.l2_size_bytes, 10);
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(tracker.elapsed() >= Duration::from_millis(10));
    }
}
