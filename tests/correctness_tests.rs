//! Single-Threaded Correctness Tests
//!
//! Deterministic tests of the public cache surface. Everything here runs on
//! one thread, where recency is exact: every traced read is drained by the
//! next `put` before it commits, so eviction order is fully predictable.
//!
//! Shard-level edge cases at capacities below the public minimum (per-shard
//! capacity of 64) live in the unit tests next to the shard engine.

use flatlru::{CacheConfig, CacheMetrics, ShardedLruCache};

/// One shard, exact-LRU setup: per-thread trace rings hold
/// `capacity / (4 * max_threads)` hints, so with these numbers up to 32
/// consecutive reads are promoted by the next write.
fn single_shard_cache(capacity: usize) -> ShardedLruCache<u64, u64> {
    ShardedLruCache::from_config(CacheConfig {
        capacity,
        shard_count: 1,
        max_threads: 2,
        ..CacheConfig::default()
    })
}

#[test]
fn test_get_put_roundtrip() {
    let cache = single_shard_cache(64);
    cache.put(1, 100);
    cache.put(2, 200);
    assert_eq!(cache.get(&1).as_deref(), Some(&100));
    assert_eq!(cache.get(&2).as_deref(), Some(&200));
    assert!(cache.get(&3).is_none(), "a miss is None, not an error");
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.capacity(), 64);
}

#[test]
fn test_update_overwrites_value() {
    let cache = single_shard_cache(64);
    cache.put(1, 100);
    cache.put(1, 101);
    cache.put(1, 102);
    assert_eq!(cache.get(&1).as_deref(), Some(&102));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_last_written_value_wins_per_key() {
    let cache = single_shard_cache(256);
    for key in 0..256u64 {
        cache.put(key, key);
    }
    for key in 0..256u64 {
        cache.put(key, key * 2);
    }
    for key in 0..256u64 {
        assert_eq!(cache.get(&key).as_deref(), Some(&(key * 2)));
    }
}

#[test]
fn test_reads_protect_keys_from_eviction() {
    let cache = single_shard_cache(256);
    for key in 0..256u64 {
        cache.put(key, key * 10);
    }
    // Touch the 32 oldest keys; the traces are drained by the next put.
    for key in 0..32u64 {
        assert_eq!(cache.get(&key).as_deref(), Some(&(key * 10)));
    }
    // 32 fresh keys must displace the untouched 32..64, not the read keys.
    for key in 256..288u64 {
        cache.put(key, key * 10);
    }

    assert_eq!(cache.len(), 256);
    for key in 0..32u64 {
        assert_eq!(
            cache.get(&key).as_deref(),
            Some(&(key * 10)),
            "recently read key {} must survive",
            key
        );
    }
    for key in 32..64u64 {
        assert!(
            cache.get(&key).is_none(),
            "least-recently-used key {} must be evicted",
            key
        );
    }
    for key in 64..256u64 {
        assert!(cache.get(&key).is_some());
    }
    for key in 256..288u64 {
        assert_eq!(cache.get(&key).as_deref(), Some(&(key * 10)));
    }
}

#[test]
fn test_capacity_bound_under_churn() {
    let cache = single_shard_cache(64);
    for key in 0..10_000u64 {
        cache.put(key, key);
    }
    assert_eq!(cache.len(), 64);
    // Exactly the newest 64 keys remain.
    for key in 9_936..10_000u64 {
        assert_eq!(cache.get(&key).as_deref(), Some(&key));
    }
    assert!(cache.get(&9_935).is_none());
}

#[test]
fn test_evicted_keys_reinsert_through_tombstones() {
    let cache = single_shard_cache(64);
    for key in 0..64u64 {
        cache.put(key, key);
    }
    // Churn every original key out, leaving their slots tombstoned.
    for key in 64..128u64 {
        cache.put(key, key);
    }
    for key in 0..64u64 {
        assert!(cache.get(&key).is_none());
    }
    // The same keys come back through the tombstones they left behind.
    for key in 0..64u64 {
        cache.put(key, key + 1_000);
    }
    for key in 0..64u64 {
        assert_eq!(cache.get(&key).as_deref(), Some(&(key + 1_000)));
    }
    assert_eq!(cache.len(), 64);
}

#[test]
fn test_quiet_update_is_idempotent() {
    let cache = single_shard_cache(64);
    cache.put(1, 10);
    let before = cache.metrics();
    cache.put(1, 10);
    cache.put(1, 10);
    let after = cache.metrics();

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&1).as_deref(), Some(&10));
    assert_eq!(after["quiet_updates"], before["quiet_updates"] + 2.0);
    assert_eq!(
        after["updates"], before["updates"],
        "equal-value puts must not run the write protocol"
    );
    assert_eq!(after["insertions"], before["insertions"]);
}

#[test]
fn test_held_handle_outlives_overwrites() {
    let cache = single_shard_cache(64);
    cache.put(42, 0);
    let held = cache.get(&42).expect("just inserted");
    for round in 1..=1_000u64 {
        cache.put(42, round);
    }
    assert_eq!(*held, 0, "a held handle never changes value");
    assert_eq!(cache.get(&42).as_deref(), Some(&1_000));
}

#[test]
fn test_held_handle_outlives_eviction_and_reuse() {
    let cache = single_shard_cache(64);
    cache.put(7, 700);
    let held = cache.get(&7).expect("just inserted");
    // Evict key 7 and churn enough to recycle its slot.
    for key in 1_000..1_256u64 {
        cache.put(key, key);
    }
    assert!(cache.get(&7).is_none());
    assert_eq!(*held, 700);
}

#[test]
fn test_handle_clone_shares_value() {
    let cache: ShardedLruCache<u64, String> = ShardedLruCache::from_config(CacheConfig {
        capacity: 64,
        shard_count: 1,
        max_threads: 2,
        ..CacheConfig::default()
    });
    cache.put(1, "shared".to_string());
    let a = cache.get(&1).unwrap();
    let b = a.clone();
    drop(a);
    assert_eq!(&*b, "shared");
    assert!(b.strong_count() >= 1);
}

#[test]
fn test_retirement_list_stays_bounded() {
    let cache = single_shard_cache(64);
    for round in 0..50_000u64 {
        cache.put(round % 8, round);
    }
    let report = cache.metrics();
    assert!(
        report["retired_pending"] <= 64.0 + 8.0,
        "retirement backlog too large: {}",
        report["retired_pending"]
    );
    assert!(report["reclaimed_values"] > 0.0);
}

#[test]
fn test_metrics_shape() {
    let cache = single_shard_cache(64);
    cache.put(1, 1);
    let _ = cache.get(&1);
    let _ = cache.get(&2);
    let report = cache.metrics();

    assert_eq!(report["cache_hits"], 1.0);
    assert_eq!(report["cache_misses"], 1.0);
    assert_eq!(report["requests"], 2.0);
    assert_eq!(report["hit_rate"], 0.5);
    assert_eq!(report["insertions"], 1.0);
    assert_eq!(report["size"], 1.0);
    assert_eq!(cache.algorithm_name(), "ShardedLRU");
}

#[test]
fn test_sharded_dispatch_keeps_keys_apart() {
    let cache: ShardedLruCache<u64, u64> = ShardedLruCache::from_config(CacheConfig {
        capacity: 512,
        shard_count: 8,
        max_threads: 4,
        ..CacheConfig::default()
    });
    for key in 0..512u64 {
        cache.put(key, key + 1);
    }
    // Shards evict independently, but every surviving key maps to its own
    // latest value and the global bound holds.
    assert!(cache.len() <= 512);
    let mut survivors = 0;
    for key in 0..512u64 {
        if let Some(value) = cache.get(&key) {
            assert_eq!(*value, key + 1);
            survivors += 1;
        }
    }
    assert_eq!(survivors, cache.len());
}

#[test]
fn test_debug_formatting() {
    let cache = single_shard_cache(64);
    let text = format!("{:?}", cache);
    assert!(text.contains("ShardedLruCache"));
}
