//! # flatlru
//!
//! A bounded, in-process key-value cache with approximate LRU eviction,
//! built for workloads where 20–50 reader threads share one logical cache
//! and a mutex-guarded list would collapse — every read of a classic LRU
//! mutates the recency order, so every read contends on the same lock.
//!
//! ## How reads stay lock-free
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                        ShardedLruCache                             │
//! │   hash(key) ──▶ shard                                              │
//! │  ┌──────────────────────────── shard ───────────────────────────┐  │
//! │  │                                                              │  │
//! │  │  reader:  epoch ▸ seqlock probe ▸ handle ▸ trace ring        │  │
//! │  │              │         │                       │             │  │
//! │  │              │    ┌────▼─────────────────┐     │ (hint)      │  │
//! │  │              │    │ flat table + LRU     │◀────┘             │  │
//! │  │              │    │ threading (one array)│   drain under     │  │
//! │  │              │    └────▲─────────────────┘   shard lock      │  │
//! │  │              │         │                       ▲             │  │
//! │  │  writer:  bump ▸ drain rings ▸ commit ▸ retire old values    │  │
//! │  │                                                              │  │
//! │  └──────────────────────────────────────────────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A read never takes a lock. It validates a per-slot sequence counter
//! (even = stable, odd = write in flight), revives a reference-counted
//! [`ValueHandle`], and enqueues a `(slot, generation)` hint into its own
//! single-producer ring. The next writer drains those rings into recency
//! splices before it touches the table, so the recency list is updated in
//! batches, off the read path.
//!
//! Three consequences worth internalizing:
//!
//! - **Approximate LRU**: if a reader's hint ring is full, the hint is
//!   dropped and that access never influences eviction order. Correctness
//!   is unaffected.
//! - **Stable handles**: a handle returned by [`ShardedLruCache::get`]
//!   keeps its value alive even after eviction; displaced values are
//!   destroyed only once every reader that could have observed them has
//!   left its epoch.
//! - **Per-shard writers**: `put` serializes on one shard's mutex;
//!   different shards proceed independently.
//!
//! ## Quick reference
//!
//! | Operation | Path | Cost |
//! |-----------|------|------|
//! | `get(key)` | lock-free | probe + refcount + ring push |
//! | `put(key, value)` | shard lock | drain + commit + deferred reclaim |
//! | `put` of an equal value | shard lock | recency splice only |
//!
//! ## Example
//!
//! ```
//! use flatlru::{CacheConfig, ShardedLruCache};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let cache: Arc<ShardedLruCache<u64, u64>> = Arc::new(ShardedLruCache::from_config(
//!     CacheConfig {
//!         capacity: 4096,
//!         shard_count: 8,
//!         max_threads: 16,
//!         ..CacheConfig::default()
//!     },
//! ));
//!
//! let reader = {
//!     let cache = Arc::clone(&cache);
//!     thread::spawn(move || {
//!         for key in 0..1000 {
//!             if let Some(value) = cache.get(&key) {
//!                 assert_eq!(*value % 1000, key % 1000);
//!             }
//!         }
//!     })
//! };
//!
//! for key in 0..1000 {
//!     cache.put(key, key);
//! }
//! reader.join().unwrap();
//! ```
//!
//! ## Thread identity
//!
//! Each thread touching a cache is lazily assigned an id below
//! `max_threads`, which selects its trace ring and epoch slot. Ids are
//! recycled when threads exit; exceeding `max_threads` concurrently-live
//! threads on one cache is a precondition violation and panics.

/// Pluggable value allocation: the [`ValueAlloc`](arena::ValueAlloc) trait,
/// a 2 MiB-page bump arena with free-list recycling, and a global-allocator
/// fallback.
pub mod arena;

/// Cache configuration.
pub mod config;

/// Metrics reporting.
pub mod metrics;

mod cache;
mod epoch;
mod handle;
mod map;
mod ring;
mod shard;
mod tid;

pub use cache::ShardedLruCache;
pub use config::CacheConfig;
pub use handle::ValueHandle;
pub use metrics::CacheMetrics;
