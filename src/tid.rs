//! Reader Thread Identity
//!
//! Every thread touching a cache presents a stable id in
//! `[0, max_threads)`. The id selects the thread's trace ring and epoch
//! slot in each shard, so it must be unique among *live* threads: two
//! threads sharing an id would make two producers out of a single-producer
//! ring and would clobber each other's epoch stamps.
//!
//! Ids are per-cache and assigned lazily: the first time a thread calls
//! into a cache it claims the lowest free id, caches it in thread-local
//! storage, and returns it to the cache's free list when the thread exits.
//! Exhausting `max_threads` concurrently-live threads is a precondition
//! violation and aborts with a diagnostic.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Distinguishes cache instances inside thread-local id caches.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

struct TidInner {
    instance: u64,
    max_threads: usize,
    next: AtomicUsize,
    /// Ids returned by exited threads, reusable in any order.
    free: Mutex<Vec<usize>>,
}

/// A claimed id, parked in thread-local storage. Dropping it (at thread
/// exit) hands the id back for reuse.
struct ThreadSlot {
    inner: Arc<TidInner>,
    tid: usize,
}

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.inner.free.lock().push(self.tid);
    }
}

thread_local! {
    static THREAD_SLOTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

/// Per-cache reader-id allocator.
pub(crate) struct ThreadIdAllocator {
    inner: Arc<TidInner>,
}

impl ThreadIdAllocator {
    pub(crate) fn new(max_threads: usize) -> Self {
        ThreadIdAllocator {
            inner: Arc::new(TidInner {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                max_threads,
                next: AtomicUsize::new(0),
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The calling thread's id for this cache, claiming one on first use.
    pub(crate) fn current(&self) -> usize {
        THREAD_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            if let Some(slot) = slots
                .iter()
                .find(|slot| slot.inner.instance == self.inner.instance)
            {
                return slot.tid;
            }
            let tid = self.claim();
            slots.push(ThreadSlot {
                inner: Arc::clone(&self.inner),
                tid,
            });
            tid
        })
    }

    fn claim(&self) -> usize {
        if let Some(tid) = self.inner.free.lock().pop() {
            return tid;
        }
        let tid = self.inner.next.fetch_add(1, Ordering::Relaxed);
        assert!(
            tid < self.inner.max_threads,
            "more than max_threads ({}) live threads touched this cache",
            self.inner.max_threads
        );
        tid
    }
}

impl core::fmt::Debug for ThreadIdAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThreadIdAllocator")
            .field("max_threads", &self.inner.max_threads)
            .finish()
    }
}
