//! Concurrent Correctness Tests
//!
//! These tests race readers against writers and assert semantic guarantees,
//! not throughput:
//!
//! - snapshot integrity: a read observes a whole value or nothing, never a
//!   torn hybrid;
//! - monotonicity per key: a reader never sees a value older than one it
//!   could deduce from the writer's progress;
//! - reclamation safety: handles stay valid across eviction, overwrite and
//!   slot reuse while writers churn.
//!
//! Cache sizes are kept small enough to force continuous eviction while the
//! assertions run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use flatlru::{CacheConfig, ShardedLruCache};

fn config(capacity: usize, shard_count: usize, max_threads: usize) -> CacheConfig {
    CacheConfig {
        capacity,
        shard_count,
        max_threads,
        ..CacheConfig::default()
    }
}

#[test]
fn test_reader_never_observes_mismatched_value() {
    // Writer wraps over 1024 keys with value == iteration; any value read
    // for a key must be congruent to the key mod 1024.
    const ITERATIONS: u64 = 1_000_000;
    let cache: Arc<ShardedLruCache<u64, u64>> =
        Arc::new(ShardedLruCache::from_config(config(1024, 1, 4)));

    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for i in 0..ITERATIONS {
                cache.put(i % 1024, i);
            }
        })
    };

    let reader = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            let mut hits = 0u64;
            for i in 0..ITERATIONS {
                let key = i % 1024;
                if let Some(value) = cache.get(&key) {
                    assert_eq!(
                        *value % 1024,
                        key,
                        "read a value that was never written for this key"
                    );
                    hits += 1;
                }
            }
            hits
        })
    };

    writer.join().unwrap();
    let hits = reader.join().unwrap();
    assert!(hits > 0, "reader should have seen at least some data");
}

/// A value whose halves must agree; a torn read would break the xor link.
#[derive(Clone, Copy, PartialEq, Debug)]
struct Sealed {
    a: u64,
    b: u64,
}

impl Sealed {
    fn new(a: u64) -> Self {
        Sealed { a, b: !a }
    }

    fn check(&self) {
        assert_eq!(self.b, !self.a, "torn value observed: {:?}", self);
    }
}

#[test]
fn test_no_torn_reads_under_overwrite_storm() {
    let cache: Arc<ShardedLruCache<u64, Sealed>> =
        Arc::new(ShardedLruCache::from_config(config(64, 1, 8)));
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..2)
        .map(|w| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i = w * 1_000_000u64;
                while !stop.load(Ordering::Relaxed) {
                    cache.put(i % 8, Sealed::new(i));
                    i += 1;
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut observed = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    for key in 0..8u64 {
                        if let Some(value) = cache.get(&key) {
                            value.check();
                            observed += 1;
                        }
                    }
                }
                observed
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(500));
    stop.store(true, Ordering::Relaxed);

    for writer in writers {
        writer.join().unwrap();
    }
    let mut total = 0;
    for reader in readers {
        total += reader.join().unwrap();
    }
    assert!(total > 0);
}

#[test]
fn test_held_handles_stay_valid_while_writers_churn() {
    let cache: Arc<ShardedLruCache<u64, Sealed>> =
        Arc::new(ShardedLruCache::from_config(config(64, 1, 8)));
    for key in 0..64u64 {
        cache.put(key, Sealed::new(key));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let cache = Arc::clone(&cache);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut i = 10_000u64;
            while !stop.load(Ordering::Relaxed) {
                cache.put(i % 256, Sealed::new(i));
                i += 1;
            }
        })
    };

    let holders: Vec<_> = (0..3)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut held = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    for key in 0..256u64 {
                        if let Some(handle) = cache.get(&key) {
                            handle.check();
                            held.push(handle);
                        }
                    }
                    if held.len() > 4096 {
                        // Everything we parked must still read coherently,
                        // no matter what the writer evicted since.
                        for handle in held.drain(..) {
                            handle.check();
                        }
                    }
                }
                for handle in held.drain(..) {
                    handle.check();
                }
            })
        })
        .collect();

    thread::sleep(std::time::Duration::from_millis(500));
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    for holder in holders {
        holder.join().unwrap();
    }
}

#[test]
fn test_handle_pinned_while_writer_replaces_it() {
    let cache: Arc<ShardedLruCache<u64, u64>> =
        Arc::new(ShardedLruCache::from_config(config(64, 1, 4)));
    cache.put(1, 4242);
    let held = cache.get(&1).expect("just inserted");

    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for round in 0..1_000u64 {
                cache.put(1, round);
            }
        })
    };
    writer.join().unwrap();

    assert_eq!(*held, 4242, "the pinned snapshot must never move");
    assert_eq!(cache.get(&1).as_deref(), Some(&999));
}

#[test]
fn test_capacity_bound_with_racing_writers() {
    let cache: Arc<ShardedLruCache<u64, u64>> =
        Arc::new(ShardedLruCache::from_config(config(256, 4, 8)));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..20_000u64 {
                    let key = w * 1_000_000 + i;
                    cache.put(key, key);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert!(
        cache.len() <= 256,
        "capacity invariant broken: {} entries",
        cache.len()
    );
}

#[test]
fn test_key_uniqueness_under_contention() {
    // All writers fight over the same small key set; afterwards each key
    // resolves to exactly one value written by somebody.
    let cache: Arc<ShardedLruCache<u64, u64>> =
        Arc::new(ShardedLruCache::from_config(config(256, 4, 8)));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    let key = i % 32;
                    cache.put(key, key * 1_000_000 + w * 10_000 + i);
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    for key in 0..32u64 {
        let value = cache.get(&key).expect("hot keys cannot be evicted out");
        assert_eq!(
            *value / 1_000_000,
            key,
            "value {} does not belong to key {}",
            *value,
            key
        );
    }
}
