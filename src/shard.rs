//! LRU Shard Engine
//!
//! One shard = one [`LinkedFlatMap`] plus the machinery that lets 20–50
//! reader threads hammer it without ever taking a lock:
//!
//! - readers run the map's lockless probe inside an epoch guard and log a
//!   `(slot, generation)` trace into their private SPSC ring instead of
//!   touching the recency list;
//! - a one-word dirty bitmap tells writers which rings have pending traces;
//! - writers serialize on the shard mutex, drain the rings into
//!   `move_to_front` splices, commit the insert/update/eviction, and park
//!   displaced value handles on an epoch-tagged retirement list until no
//!   reader can still observe them.
//!
//! Recency is therefore *approximate*: a read whose trace ring was full
//! simply does not influence eviction order. That is the deliberate price
//! for a branch-light, lock-free read path.

use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::arena::ValueAlloc;
use crate::epoch::EpochRegistry;
use crate::handle::ValueHandle;
use crate::map::{LinkedFlatMap, MapWriter, WriteLookup};
use crate::metrics::ShardMetrics;
use crate::ring::TraceRing;

/// Retired handles accumulated past this length trigger an epoch scan at
/// the end of a put.
const RETIRE_SCAN_THRESHOLD: usize = 64;

/// Floor for the per-reader trace ring, so tiny shards still coalesce a
/// few reads per drain.
const MIN_RING_CAPACITY: usize = 8;

/// A recency hint: "reader observed slot `idx` at generation `gen`".
#[derive(Clone, Copy, Debug)]
pub(crate) struct TraceOp {
    idx: u32,
    gen: u32,
}

/// A displaced value awaiting destruction, tagged with the epoch at which
/// it became unreachable to new readers.
struct Retired<V> {
    handle: ValueHandle<V>,
    epoch: u64,
}

/// Writer-side shard state, guarded by the shard mutex.
pub(crate) struct ShardWriter<V> {
    map: MapWriter,
    retired: Vec<Retired<V>>,
}

/// One independent LRU cache partition.
pub(crate) struct LruShard<K, V, S> {
    map: LinkedFlatMap<K, V, S>,
    /// One trace ring per reader id.
    rings: Box<[CachePadded<TraceRing<TraceOp>>]>,
    /// Bit `i` set = ring `i` went non-empty since the last drain.
    dirty: CachePadded<AtomicU64>,
    epochs: EpochRegistry,
    writer: Mutex<ShardWriter<V>>,
    metrics: ShardMetrics,
    capacity: usize,
    alloc: &'static dyn ValueAlloc,
}

impl<K, V, S> LruShard<K, V, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher,
{
    pub(crate) fn new(
        capacity: usize,
        max_threads: usize,
        hash_builder: S,
        hash_shift: u32,
        alloc: &'static dyn ValueAlloc,
    ) -> Self {
        let (map, map_writer) = LinkedFlatMap::new(capacity, hash_builder, hash_shift);
        let ring_capacity = (capacity / (4 * max_threads))
            .max(MIN_RING_CAPACITY)
            .next_power_of_two();
        let rings = (0..max_threads)
            .map(|_| CachePadded::new(TraceRing::new(ring_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        LruShard {
            map,
            rings,
            dirty: CachePadded::new(AtomicU64::new(0)),
            epochs: EpochRegistry::new(max_threads),
            writer: Mutex::new(ShardWriter {
                map: map_writer,
                retired: Vec::new(),
            }),
            metrics: ShardMetrics::new(),
            capacity,
            alloc,
        }
    }

    /// Lock-free read. Returns a handle that stays valid for its own
    /// lifetime regardless of later evictions.
    pub(crate) fn get(&self, tid: usize, key: &K) -> Option<ValueHandle<V>> {
        let _epoch = self.epochs.enter(tid);
        match self.map.get_lockless(key) {
            Some(hit) => {
                self.mark_access(tid, TraceOp {
                    idx: hit.idx,
                    gen: hit.gen,
                });
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit.handle)
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Logs a recency hint. A full ring drops the hint on the floor; the
    /// read stays correct, it just won't count toward recency.
    #[inline]
    fn mark_access(&self, tid: usize, op: TraceOp) {
        if self.rings[tid].push(op) {
            let bit = 1u64 << tid;
            // Test before test-and-set keeps the common already-dirty case
            // free of an atomic RMW.
            if self.dirty.load(Ordering::Relaxed) & bit == 0 {
                self.dirty.fetch_or(bit, Ordering::Release);
            }
        } else {
            self.metrics.dropped_traces.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Inserts or replaces `key`. Serializes with other writers on the
    /// shard lock; never blocks readers.
    pub(crate) fn put(&self, key: K, value: V)
    where
        V: PartialEq,
    {
        {
            // Quiet-update fast path: same value again only promotes
            // recency, skipping epoch, allocation, and retirement.
            let mut w = self.writer.lock();
            if let WriteLookup::Found { idx } = self.map.lookup(&w.map, &key) {
                let unchanged = self.map.value_at(&w.map, idx).is_some_and(|v| *v == value);
                if unchanged {
                    self.map.move_to_front(&mut w.map, idx);
                    self.metrics.quiet_updates.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        // Build the replacement outside the critical section; the lookup
        // below re-validates whatever changed in between.
        let handle = ValueHandle::new_in(value, self.alloc);

        let mut w = self.writer.lock();
        self.epochs.bump();
        if self.dirty.load(Ordering::Relaxed) != 0 {
            self.apply_traces(&mut w);
        }
        self.commit_put(&mut w, key, handle);
        if w.retired.len() >= RETIRE_SCAN_THRESHOLD {
            self.reclaim_retired(&mut w);
        }
    }

    /// Drains every dirty trace ring into recency splices. Stale traces
    /// (slot re-published since the read) are silently dropped.
    fn apply_traces(&self, w: &mut ShardWriter<V>) {
        let mut mask = self.dirty.swap(0, Ordering::Acquire);
        while mask != 0 {
            let reader = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            while let Some(op) = self.rings[reader].pop() {
                if self.map.is_valid_gen(op.idx, op.gen) {
                    self.map.move_to_front(&mut w.map, op.idx);
                }
            }
        }
        if !w.retired.is_empty() {
            self.reclaim_retired(w);
        }
    }

    /// Insert-or-update against the map, evicting the recency tail when the
    /// shard is full.
    fn commit_put(&self, w: &mut ShardWriter<V>, key: K, handle: ValueHandle<V>) {
        match self.map.lookup(&w.map, &key) {
            WriteLookup::Found { idx } => {
                let old = self.map.update_slot(&mut w.map, idx, handle);
                w.retired.push(Retired {
                    handle: old,
                    epoch: self.epochs.current(),
                });
                self.map.move_to_front(&mut w.map, idx);
                self.metrics.updates.fetch_add(1, Ordering::Relaxed);
            }
            WriteLookup::Miss { insert_idx } => {
                let mut idx = insert_idx;
                if w.map.len >= self.capacity {
                    let tail = w.map.tail;
                    let evicted = self
                        .map
                        .erase_index(&mut w.map, tail)
                        .expect("full shard must have an evictable tail");
                    w.retired.push(Retired {
                        handle: evicted,
                        epoch: self.epochs.current(),
                    });
                    self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                    // The eviction may have opened a tombstone earlier on
                    // this key's probe path; re-probe.
                    idx = self.map.assign_slot(&w.map, &key);
                }
                self.map.emplace_at(&mut w.map, idx, key, handle);
                self.map.move_to_front(&mut w.map, idx);
                self.metrics.insertions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Releases every retired handle no active reader could still observe.
    fn reclaim_retired(&self, w: &mut ShardWriter<V>) {
        let min_active = self.epochs.min_active();
        let before = w.retired.len();
        w.retired.retain(|r| r.epoch >= min_active);
        let dropped = before - w.retired.len();
        if dropped > 0 {
            self.metrics
                .reclaimed
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.writer.lock().map.len
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn metrics(&self) -> &ShardMetrics {
        &self.metrics
    }

    /// (entries, pending retirements) under the lock, for gauges.
    pub(crate) fn locked_stats(&self) -> (usize, usize) {
        let w = self.writer.lock();
        (w.map.len, w.retired.len())
    }
}

impl<K, V, S> core::fmt::Debug for LruShard<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LruShard")
            .field("capacity", &self.capacity)
            .field("readers", &self.rings.len())
            .finish()
    }
}
