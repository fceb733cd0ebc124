//! Process-wide performance counters.
//!
//! Counters only grow during the lifetime of the process; [`MetricsAccumulator::reset`]
//! is the only way to zero them. The store, the dispatcher and the selector
//! share one accumulator through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::dispatch::TaskSource;

/// Read-only copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    /// Number of cache hits.
    pub cache_hits: u64,

    /// Number of cache misses (expired lookups included).
    pub cache_misses: u64,

    /// Entries removed to respect the size budget.
    pub evictions: u64,

    /// Entries removed because their TTL elapsed.
    pub expirations: u64,

    /// Estimated seconds saved by running tasks concurrently.
    pub time_saved_secs: f64,

    /// Tasks answered from the cache.
    pub tasks_cached: u64,

    /// Tasks whose executor succeeded.
    pub tasks_executed: u64,

    /// Tasks answered by their fallback.
    pub tasks_fallback: u64,

    /// `hits / max(hits + misses, 1)`.
    pub hit_rate: f64,
}

/// Monotonic counters shared by every component.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    time_saved_micros: AtomicU64,
    tasks_cached: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_fallback: AtomicU64,
}

impl MetricsAccumulator {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a cache lookup.
    pub fn record_cache_access(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an LRU eviction.
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an entry dropped because it expired.
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the time-saved counter. Negative or non-finite values are ignored.
    pub fn record_time_saved(&self, seconds: f64) {
        if !seconds.is_finite() || seconds <= 0.0 {
            return;
        }
        // Float-to-int casts saturate.
        let micros = (seconds * 1_000_000.0) as u64;
        self.time_saved_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Records where a task's value came from.
    pub fn record_task(&self, source: TaskSource) {
        let counter = match source {
            TaskSource::Cached => &self.tasks_cached,
            TaskSource::Executed => &self.tasks_executed,
            TaskSource::Fallback => &self.tasks_fallback,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a copy of the counters.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let cache_hits = self.hits.load(Ordering::Relaxed);
        let cache_misses = self.misses.load(Ordering::Relaxed);
        let lookups = (cache_hits + cache_misses).max(1);

        PerformanceSnapshot {
            cache_hits,
            cache_misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            time_saved_secs: self.time_saved_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            tasks_cached: self.tasks_cached.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_fallback: self.tasks_fallback.load(Ordering::Relaxed),
            hit_rate: cache_hits as f64 / lookups as f64,
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.expirations,
            &self.time_saved_micros,
            &self.tasks_cached,
            &self.tasks_executed,
            &self.tasks_fallback,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
