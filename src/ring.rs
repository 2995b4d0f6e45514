//! Bounded SPSC Trace Ring
//!
//! A wait-free single-producer/single-consumer ring buffer carrying recency
//! hints from one reader thread to the shard writer. The ring is a mailbox
//! for *hints*, not state: `push` on a full ring returns `false` and the
//! caller simply forgets the hint. Nothing waits, nothing overwrites.
//!
//! ```text
//!  reader (producer)                       writer (consumer, under lock)
//!  ──────────────────                      ────────────────────────────
//!  push(op) ──▶ [ op | op | op |   |   ] ──▶ pop() ──▶ move_to_front
//!                ▲ head              ▲ tail
//! ```
//!
//! Each side owns one cursor and keeps a *cached* copy of the opposite
//! cursor, so the fast path touches no shared atomic at all; the opposite
//! index is re-read (acquire) only when the cached value predicts
//! full/empty. The two cursors live on separate cache lines to keep the
//! producer and consumer from invalidating each other.

use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// One ring cursor: the owning side's index plus its cached snapshot of the
/// opposite index. `cached` is only ever touched by the owning side.
struct Cursor {
    index: AtomicUsize,
    cached: Cell<usize>,
}

impl Cursor {
    fn new() -> Self {
        Cursor {
            index: AtomicUsize::new(0),
            cached: Cell::new(0),
        }
    }
}

/// A bounded SPSC ring buffer with power-of-two capacity.
///
/// Indices run free (they are masked on slot access), so "full" is simply
/// `tail - head == capacity` and "empty" is `tail == head`.
///
/// # Contract
///
/// At most one thread may call [`push`](TraceRing::push) and at most one
/// thread may call [`pop`](TraceRing::pop) at any point in time. In this
/// crate the producer is the reader thread owning the ring's slot in the
/// shard, and the consumer is whichever writer holds the shard lock; the
/// thread-id registry guarantees producer uniqueness.
pub(crate) struct TraceRing<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Consumer cursor; `cached` mirrors the producer's tail.
    head: CachePadded<Cursor>,
    /// Producer cursor; `cached` mirrors the consumer's head.
    tail: CachePadded<Cursor>,
}

// SAFETY: the UnsafeCell slots are published from producer to consumer via
// the release store on `tail.index` and never aliased: a slot is written
// only while it is outside the [head, tail) window and read only while
// inside it. The `cached` cells are private to their owning side per the
// SPSC contract above.
unsafe impl<T: Send> Send for TraceRing<T> {}
unsafe impl<T: Send> Sync for TraceRing<T> {}

impl<T: Copy> TraceRing<T> {
    /// Creates a ring holding up to `capacity` items.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        TraceRing {
            buf,
            mask: capacity - 1,
            head: CachePadded::new(Cursor::new()),
            tail: CachePadded::new(Cursor::new()),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Enqueues an item, returning `false` if the ring is full.
    ///
    /// Producer side only. A `false` return is a legitimate dropped hint,
    /// never an error.
    #[inline]
    pub(crate) fn push(&self, item: T) -> bool {
        let tail = self.tail.index.load(Ordering::Relaxed);
        if tail.wrapping_sub(self.tail.cached.get()) == self.capacity() {
            // Cached head predicts full; refresh it before giving up.
            let head = self.head.index.load(Ordering::Acquire);
            self.tail.cached.set(head);
            if tail.wrapping_sub(head) == self.capacity() {
                return false;
            }
        }
        // SAFETY: the slot at `tail` is outside the occupied window, so the
        // consumer cannot be reading it; we are the only producer.
        unsafe {
            (*self.buf[tail & self.mask].get()).write(item);
        }
        self.tail.index.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Dequeues the oldest item, or `None` if the ring is empty.
    ///
    /// Consumer side only.
    #[inline]
    pub(crate) fn pop(&self) -> Option<T> {
        let head = self.head.index.load(Ordering::Relaxed);
        if head == self.head.cached.get() {
            // Cached tail predicts empty; refresh it before giving up.
            let tail = self.tail.index.load(Ordering::Acquire);
            self.head.cached.set(tail);
            if head == tail {
                return None;
            }
        }
        // SAFETY: head < tail, so the slot was fully written before the
        // producer's release store on `tail.index`; we are the only consumer.
        let item = unsafe { (*self.buf[head & self.mask].get()).assume_init_read() };
        self.head.index.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }
}

impl<T> core::fmt::Debug for TraceRing<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TraceRing")
            .field("capacity", &(self.mask + 1))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_roundtrip() {
        let ring: TraceRing<u64> = TraceRing::new(4);
        assert!(ring.pop().is_none());
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert!(ring.pop().is_none());
    }

    #[test]
    fn test_full_ring_drops() {
        let ring: TraceRing<u64> = TraceRing::new(4);
        for i in 0..4 {
            assert!(ring.push(i));
        }
        assert!(!ring.push(99), "push into a full ring must fail");
        assert_eq!(ring.pop(), Some(0));
        assert!(ring.push(99), "freed slot must be reusable");
    }

    #[test]
    fn test_wraparound() {
        let ring: TraceRing<u64> = TraceRing::new(2);
        for round in 0..1000u64 {
            assert!(ring.push(round));
            assert_eq!(ring.pop(), Some(round));
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_non_power_of_two_capacity() {
        let _ = TraceRing::<u64>::new(3);
    }

    #[test]
    fn test_spsc_threads() {
        const ITEMS: u64 = 100_000;
        let ring: Arc<TraceRing<u64>> = Arc::new(TraceRing::new(64));

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..ITEMS {
                    while !ring.push(i) {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut expected = 0;
                while expected < ITEMS {
                    if let Some(v) = ring.pop() {
                        assert_eq!(v, expected, "items must arrive in order");
                        expected += 1;
                    }
                }
            })
        };

        producer.join().unwrap();
        consumer.join().unwrap();
    }
}
