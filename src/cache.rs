//! Sharded Cache Front-End
//!
//! [`ShardedLruCache`] partitions the key space across `2^k` independent
//! [`LruShard`]s by hash, so writer serialization and reader coherence
//! traffic stay local to one shard. There is no cross-shard coordination of
//! any kind: a key's shard is a pure function of its hash, and no key ever
//! lives in two shards.
//!
//! Each shard sits behind a cache-line-aligned wrapper so neighbouring
//! shards' lock words and dirty bitmaps never share a line.

use core::hash::{BuildHasher, Hash};
use std::collections::BTreeMap;

use ahash::RandomState;
use crossbeam_utils::CachePadded;

use crate::arena::{PageArena, ValueAlloc};
use crate::config::CacheConfig;
use crate::handle::ValueHandle;
use crate::metrics::CacheMetrics;
use crate::shard::LruShard;
use crate::tid::ThreadIdAllocator;

/// A bounded, sharded LRU cache optimized for read-heavy multi-core
/// workloads.
///
/// Reads take no lock: they validate a per-slot sequence counter, revive a
/// shared-ownership [`ValueHandle`], and log a recency hint into a
/// per-thread ring. Writes serialize per shard, fold the pending hints into
/// the recency list, and defer destruction of displaced values until no
/// reader can still observe them.
///
/// Recency is approximate by design: a read whose hint ring was full does
/// not influence eviction order.
///
/// # Type parameters
///
/// - `K`: key; `Copy + Hash + Eq` — keys live inline in table slots and
///   are snapshotted by racing readers.
/// - `V`: value; `PartialEq` enables the quiet-update fast path.
/// - `S`: hash builder, defaulting to [`ahash::RandomState`].
///
/// # Example
///
/// ```
/// use flatlru::ShardedLruCache;
///
/// let cache: ShardedLruCache<u64, String> = ShardedLruCache::new(1024);
/// cache.put(1, "one".to_string());
/// let value = cache.get(&1).expect("just inserted");
/// assert_eq!(&*value, "one");
/// ```
pub struct ShardedLruCache<K, V, S = RandomState> {
    shards: Box<[CachePadded<LruShard<K, V, S>>]>,
    hash_builder: S,
    shard_mask: u64,
    tids: ThreadIdAllocator,
}

impl<K, V> ShardedLruCache<K, V, RandomState>
where
    K: Copy + Hash + Eq,
{
    /// Creates a cache with the given total capacity (a power of two) and
    /// default sharding.
    pub fn new(capacity: usize) -> Self {
        Self::from_config(CacheConfig::new(capacity))
    }

    /// Creates a cache from an explicit configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        Self::with_hasher(config, RandomState::new())
    }
}

impl<K, V, S> ShardedLruCache<K, V, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher + Clone,
{
    /// Creates a cache with a custom hash builder. The builder is cloned
    /// into every shard so reader and writer probes agree on slot indices.
    pub fn with_hasher(config: CacheConfig, hash_builder: S) -> Self {
        config.validate();
        let alloc: &'static dyn ValueAlloc = match config.allocator {
            Some(alloc) => alloc,
            None => PageArena::global(),
        };
        let shard_bits = config.shard_count.trailing_zeros();
        let shards = (0..config.shard_count)
            .map(|_| {
                CachePadded::new(LruShard::new(
                    config.shard_capacity(),
                    config.max_threads,
                    hash_builder.clone(),
                    shard_bits,
                    alloc,
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ShardedLruCache {
            shards,
            hash_builder,
            shard_mask: (config.shard_count - 1) as u64,
            tids: ThreadIdAllocator::new(config.max_threads),
        }
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &LruShard<K, V, S> {
        let idx = (self.hash_builder.hash_one(key) & self.shard_mask) as usize;
        &self.shards[idx]
    }

    /// Looks up `key` without taking any lock.
    ///
    /// The returned handle keeps its value readable for the handle's whole
    /// lifetime, even if the entry is evicted or overwritten meanwhile.
    /// `None` is a cache miss, never an error.
    pub fn get(&self, key: &K) -> Option<ValueHandle<V>> {
        let tid = self.tids.current();
        self.shard_for(key).get(tid, key)
    }

    /// Inserts or replaces `key`, evicting the shard's least-recently-used
    /// entry if it is full. Writers serialize per shard only.
    pub fn put(&self, key: K, value: V)
    where
        V: PartialEq,
    {
        self.shard_for(&key).put(key, value);
    }

    /// Total entries across all shards. Takes each shard's writer lock in
    /// turn, so the sum is only quiescently exact.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    /// `true` if no shard holds any entry.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.len() == 0)
    }

    /// Total capacity across all shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(|shard| shard.capacity()).sum()
    }

    /// Number of independent shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl<K, V, S> CacheMetrics for ShardedLruCache<K, V, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher + Clone,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut report = BTreeMap::new();
        let mut entries = 0usize;
        let mut retired = 0usize;
        for shard in self.shards.iter() {
            shard.metrics().accumulate(&mut report);
            let (len, pending) = shard.locked_stats();
            entries += len;
            retired += pending;
        }
        let hits = report.get("cache_hits").copied().unwrap_or(0.0);
        let misses = report.get("cache_misses").copied().unwrap_or(0.0);
        report.insert("requests".to_string(), hits + misses);
        if hits + misses > 0.0 {
            report.insert("hit_rate".to_string(), hits / (hits + misses));
        }
        report.insert("size".to_string(), entries as f64);
        report.insert("retired_pending".to_string(), retired as f64);
        report
    }

    fn algorithm_name(&self) -> &'static str {
        "ShardedLRU"
    }
}

impl<K, V, S> core::fmt::Debug for ShardedLruCache<K, V, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher + Clone,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShardedLruCache")
            .field("shards", &self.shards.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
