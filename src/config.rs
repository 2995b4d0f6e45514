//! Cache Configuration
//!
//! Configuration for [`ShardedLruCache`](crate::ShardedLruCache). The struct
//! has all public fields for simple instantiation:
//!
//! - **Simple**: create the struct with the fields you care about
//! - **Validated once**: all structural invariants are checked at
//!   construction time, never on the hot path
//!
//! # Sizing rules
//!
//! | Field | Constraint |
//! |-------|------------|
//! | `capacity` | power of two, total across all shards |
//! | `shard_count` | power of two |
//! | `max_threads` | power of two, at most 64 |
//! | `capacity / shard_count` | at least 64 |
//!
//! `max_threads` is capped at 64 so that the per-shard dirty bitmap (one bit
//! per reader id) fits in a single `u64`.
//!
//! # Example
//!
//! ```
//! use flatlru::{CacheConfig, ShardedLruCache};
//!
//! let config = CacheConfig {
//!     capacity: 8192,
//!     shard_count: 8,
//!     max_threads: 16,
//!     ..CacheConfig::default()
//! };
//! let cache: ShardedLruCache<u64, String> = ShardedLruCache::from_config(config);
//! assert_eq!(cache.capacity(), 8192);
//! ```

use crate::arena::ValueAlloc;

/// Bit width of the dirty bitmap; also the hard ceiling on `max_threads`.
pub const MAX_READERS: usize = 64;

/// Configuration for a sharded LRU cache.
///
/// `allocator` is the backing store for value allocations. `None` selects the
/// process-wide page arena ([`PageArena::global`](crate::arena::PageArena::global)).
/// A custom allocator must be `'static`: value handles returned by `get` keep
/// referencing it after the cache itself is gone.
#[derive(Clone, Copy)]
pub struct CacheConfig {
    /// Total number of entries the cache can hold, across all shards.
    pub capacity: usize,
    /// Number of independent shards (more shards = less writer contention).
    pub shard_count: usize,
    /// Upper bound on distinct live threads that may touch the cache.
    pub max_threads: usize,
    /// Backing allocator for value storage; `None` = shared page arena.
    pub allocator: Option<&'static dyn ValueAlloc>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 4096 * 32,
            shard_count: 32,
            max_threads: 32,
            allocator: None,
        }
    }
}

impl CacheConfig {
    /// Creates a config with the given total capacity and a shard count
    /// scaled down so every shard keeps at least 64 slots.
    pub fn new(capacity: usize) -> Self {
        let default = CacheConfig::default();
        let mut shard_count = default.shard_count;
        while shard_count > 1 && capacity / shard_count < 64 {
            shard_count /= 2;
        }
        CacheConfig {
            capacity,
            shard_count,
            ..default
        }
    }

    /// Entries per shard.
    #[inline]
    pub fn shard_capacity(&self) -> usize {
        self.capacity / self.shard_count
    }

    /// Panics if the configuration violates a structural invariant.
    pub(crate) fn validate(&self) {
        assert!(
            self.capacity.is_power_of_two(),
            "capacity must be a power of two"
        );
        assert!(
            self.shard_count.is_power_of_two(),
            "shard_count must be a power of two"
        );
        assert!(
            self.max_threads.is_power_of_two() && self.max_threads <= MAX_READERS,
            "max_threads must be a power of two no greater than {}",
            MAX_READERS
        );
        assert!(
            self.shard_capacity() >= 64,
            "shard capacity too small: {} entries over {} shards",
            self.capacity,
            self.shard_count
        );
    }
}

impl core::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("capacity", &self.capacity)
            .field("shard_count", &self.shard_count)
            .field("max_threads", &self.max_threads)
            .field("allocator", &self.allocator.map(|_| "custom"))
            .finish()
    }
}
