//! Cache Metrics Collection
//!
//! Counters shared by the cache-aside template and the interception layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    hits: AtomicU64,
    misses: AtomicU64,

    // Population
    loads: AtomicU64,
    load_failures: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,

    // Interception
    invalidations: AtomicU64,
    aborted_calls: AtomicU64,
    suppressed_failures: AtomicU64,

    // Load latency (microseconds, exponential moving average)
    load_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one load function or wrapped operation invocation
    pub fn record_load(&self, duration: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.load_latency_us, duration);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_call(&self) {
        self.aborted_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed_failure(&self) {
        self.suppressed_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
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

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    pub fn aborted_calls(&self) -> u64 {
        self.aborted_calls.load(Ordering::Relaxed)
    }

    pub fn suppressed_failures(&self) -> u64 {
        self.suppressed_failures.load(Ordering::Relaxed)
    }

    pub fn load_latency(&self) -> Duration {
        Duration::from_micros(self.load_latency_us.load(Ordering::Relaxed))
    }

    /// Fraction of lookups served from the cache
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            loads: self.loads(),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            load_latency: self.load_latency(),
            writes: self.writes(),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations(),
            aborted_calls: self.aborted_calls(),
            suppressed_failures: self.suppressed_failures(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.loads.store(0, Ordering::Relaxed);
        self.load_failures.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.aborted_calls.store(0, Ordering::Relaxed);
        self.suppressed_failures.store(0, Ordering::Relaxed);
        self.load_latency_us.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub loads: u64,
    pub load_failures: u64,
    pub load_latency: Duration,
    pub writes: u64,
    pub write_failures: u64,
    pub invalidations: u64,
    pub aborted_calls: u64,
    pub suppressed_failures: u64,
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
