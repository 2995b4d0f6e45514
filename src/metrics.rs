//! Cache Metrics
//!
//! A small BTreeMap-based metrics surface shared by observability tooling
//! and tests. BTreeMap rather than HashMap so reports come out in a
//! deterministic key order — essential for reproducible test and benchmark
//! comparisons, and the O(log n) cost is irrelevant at ~a dozen keys.
//!
//! Readers are lock-free, so per-shard counters are relaxed atomics bumped
//! in place; the cache aggregates across shards on demand.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uniform metrics reporting for cache implementations.
pub trait CacheMetrics {
    /// All metrics as key-value pairs in deterministic (sorted) order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Identifies the eviction algorithm (e.g. "ShardedLRU").
    fn algorithm_name(&self) -> &'static str;
}

/// Per-shard event counters. All increments are relaxed: the counters are
/// monotonic tallies, not synchronization.
#[derive(Debug, Default)]
pub(crate) struct ShardMetrics {
    /// Successful lockless reads.
    pub(crate) hits: AtomicU64,
    /// Reads that found no entry (or lost a seqlock race — indistinguishable
    /// by design).
    pub(crate) misses: AtomicU64,
    /// New entries planted into empty or tombstoned slots.
    pub(crate) insertions: AtomicU64,
    /// In-place value replacements.
    pub(crate) updates: AtomicU64,
    /// Puts that found an equal value and only promoted recency.
    pub(crate) quiet_updates: AtomicU64,
    /// Entries removed to make room.
    pub(crate) evictions: AtomicU64,
    /// Recency hints dropped because a trace ring was full.
    pub(crate) dropped_traces: AtomicU64,
    /// Retired value handles actually released.
    pub(crate) reclaimed: AtomicU64,
}

impl ShardMetrics {
    pub(crate) fn new() -> Self {
        ShardMetrics::default()
    }

    /// Adds this shard's counters into an aggregate report.
    pub(crate) fn accumulate(&self, into: &mut BTreeMap<String, f64>) {
        let mut add = |key: &str, counter: &AtomicU64| {
            *into.entry(key.to_string()).or_insert(0.0) += counter.load(Ordering::Relaxed) as f64;
        };
        add("cache_hits", &self.hits);
        add("cache_misses", &self.misses);
        add("insertions", &self.insertions);
        add("updates", &self.updates);
        add("quiet_updates", &self.quiet_updates);
        add("evictions", &self.evictions);
        add("dropped_traces", &self.dropped_traces);
        add("reclaimed_values", &self.reclaimed);
    }
}
