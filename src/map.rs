//! Linked Flat Map
//!
//! The storage engine of a cache shard: one flat array of slots combining
//!
//! - an **open-addressed hash table** (linear probing, load factor capped at
//!   0.5 so a probe always meets an Empty slot and terminates), and
//! - an **intrusive doubly-linked recency list** threaded through the same
//!   slots by `u32` indices (head = most recently used),
//!
//! so a cache entry costs exactly one table cell and zero list allocations.
//!
//! ```text
//!  slots:  [ E ][ O:k7 ][ D ][ O:k2 ][ E ][ O:k9 ][ E ][ E ]
//!                  │ ▲            │ ▲        │ ▲
//!                  ▼ │  prev/next ▼ │        ▼ │
//!        head ──▶ k2  ◀─────────▶  k9  ◀──▶  k7 ◀── tail
//! ```
//!
//! # Concurrency discipline
//!
//! Two classes of state live in each slot:
//!
//! - **Reader-visible**: `gen` (sequence counter), `state`, the inline key
//!   and the value pointer. Writers mutate these under the per-slot
//!   sequence lock: bump `gen` to odd, mutate, bump back to even with
//!   release stores. Readers validate with acquire loads and discard any
//!   snapshot bracketed by differing or odd generations.
//! - **Writer-only**: `prev`/`next` links plus the `head`/`tail`/`len`
//!   fields in [`MapWriter`]. Readers never traverse the list, so these are
//!   plain cells. All writer-side methods take `&MapWriter`/`&mut MapWriter`,
//!   which only exists inside the shard's mutex — holding the lock is
//!   proven by the borrow, not by convention.
//!
//! Tombstones (`Deleted`) keep probe chains intact and are never compacted;
//! they are reclaimed only by a later insertion landing on them.

use core::cell::{Cell, UnsafeCell};
use core::hash::{BuildHasher, Hash};
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU8, Ordering};

use crate::handle::{ValueBox, ValueHandle};

/// Sentinel for "no slot" in the intrusive list.
pub(crate) const NULL_IDX: u32 = u32::MAX;

const STATE_EMPTY: u8 = 0;
const STATE_OCCUPIED: u8 = 1;
const STATE_DELETED: u8 = 2;

/// How long a reader spins on an odd (mid-write) generation before giving
/// the slot up as a miss.
const ODD_GEN_SPIN: usize = 64;

/// One table cell.
struct Slot<K, V> {
    /// Sequence counter: even = stable, odd = write in flight.
    gen: AtomicU32,
    state: AtomicU8,
    /// Recency links, writer-only.
    prev: Cell<u32>,
    next: Cell<u32>,
    /// Inline key; initialized iff the slot has ever been occupied.
    key: UnsafeCell<MaybeUninit<K>>,
    /// Strong reference to the value box; null unless occupied.
    value: AtomicPtr<ValueBox<V>>,
}

impl<K, V> Slot<K, V> {
    fn new() -> Self {
        Slot {
            gen: AtomicU32::new(0),
            state: AtomicU8::new(STATE_EMPTY),
            prev: Cell::new(NULL_IDX),
            next: Cell::new(NULL_IDX),
            key: UnsafeCell::new(MaybeUninit::uninit()),
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Writer-side map state. Owned by the shard's mutex: every method that
/// mutates the table demands a `&mut MapWriter`, so exclusive writership is
/// enforced by the type system.
pub(crate) struct MapWriter {
    pub(crate) head: u32,
    pub(crate) tail: u32,
    pub(crate) len: usize,
}

/// A successful lockless read: the revived handle plus the slot coordinates
/// for the recency hint.
pub(crate) struct ReadHit<V> {
    pub(crate) handle: ValueHandle<V>,
    pub(crate) idx: u32,
    pub(crate) gen: u32,
}

/// Writer-side probe outcome.
pub(crate) enum WriteLookup {
    Found { idx: u32 },
    /// Key absent; `insert_idx` is the first tombstone on the probe path,
    /// or the terminating empty slot.
    Miss { insert_idx: u32 },
}

/// Open-addressed table with intrusive LRU threading. `capacity` entries
/// live in `2 * capacity` slots.
pub(crate) struct LinkedFlatMap<K, V, S> {
    slots: Box<[Slot<K, V>]>,
    mask: usize,
    hash_builder: S,
    /// Bits already consumed by shard selection; discarded here so the
    /// in-shard probe sequence decorrelates from the shard index.
    hash_shift: u32,
}

// SAFETY: reader-visible slot state is only accessed through the sequence-
// lock protocol (atomics plus volatile key snapshots that are discarded on
// generation mismatch); writer-only state is reached exclusively through
// MapWriter, which lives inside the shard's mutex. K crosses threads by
// copy, V through ValueHandle.
unsafe impl<K: Copy + Send + Sync, V: Send + Sync, S: Send> Send for LinkedFlatMap<K, V, S> {}
unsafe impl<K: Copy + Send + Sync, V: Send + Sync, S: Sync> Sync for LinkedFlatMap<K, V, S> {}

impl<K, V, S> LinkedFlatMap<K, V, S>
where
    K: Copy + Hash + Eq,
    S: BuildHasher,
{
    pub(crate) fn new(capacity: usize, hash_builder: S, hash_shift: u32) -> (Self, MapWriter) {
        assert!(
            capacity.is_power_of_two(),
            "map capacity must be a power of two"
        );
        let table_size = capacity * 2;
        assert!(
            table_size < NULL_IDX as usize,
            "map capacity exceeds the u32 index space"
        );
        let slots = (0..table_size)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let map = LinkedFlatMap {
            slots,
            mask: table_size - 1,
            hash_builder,
            hash_shift,
        };
        let writer = MapWriter {
            head: NULL_IDX,
            tail: NULL_IDX,
            len: 0,
        };
        (map, writer)
    }

    #[inline]
    fn hash_index(&self, key: &K) -> usize {
        ((self.hash_builder.hash_one(key) >> self.hash_shift) as usize) & self.mask
    }

    #[inline]
    fn next_slot(&self, idx: usize) -> usize {
        (idx + 1) & self.mask
    }

    /// Lockless reader probe.
    ///
    /// Walks slots from the key's home bucket. An Empty slot terminates the
    /// probe as a miss; a Deleted slot is skipped. On a key match the value
    /// reference is revived and the generation re-checked: any concurrent
    /// mutation of the slot voids the snapshot and the whole read reports a
    /// miss (the caller retries at its own discretion — for a cache, a
    /// spurious miss is benign).
    ///
    /// The caller must be inside an epoch guard: reviving the value pointer
    /// is only safe while retired boxes from concurrent writers are pinned.
    pub(crate) fn get_lockless(&self, key: &K) -> Option<ReadHit<V>> {
        let mut idx = self.hash_index(key);
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];

            let mut gen = slot.gen.load(Ordering::Acquire);
            if gen & 1 != 0 {
                // A writer is mid-publication; give it a moment.
                for _ in 0..ODD_GEN_SPIN {
                    core::hint::spin_loop();
                }
                gen = slot.gen.load(Ordering::Acquire);
                if gen & 1 != 0 {
                    return None;
                }
            }

            let state = slot.state.load(Ordering::Acquire);
            if state == STATE_EMPTY {
                return None;
            }

            if state == STATE_OCCUPIED {
                // Racy snapshot of the inline key; only trusted if the
                // generation below confirms the slot held still.
                let snapshot = unsafe { ptr::read_volatile(slot.key.get()).assume_init() };
                if snapshot == *key {
                    let raw = slot.value.load(Ordering::Acquire);
                    if raw.is_null() {
                        return None;
                    }
                    // SAFETY: the epoch guard keeps the box alive even if
                    // this pointer is stale (see module docs).
                    unsafe { ValueBox::incref(raw) };
                    if slot.gen.load(Ordering::Acquire) == gen {
                        // SAFETY: the reference added above is ours.
                        let handle = unsafe { ValueHandle::from_raw(raw) };
                        return Some(ReadHit {
                            handle,
                            idx: idx as u32,
                            gen,
                        });
                    }
                    // Slot moved under us; surrender the reference.
                    drop(unsafe { ValueHandle::from_raw(raw) });
                    return None;
                }
            }

            idx = self.next_slot(idx);
        }
        None
    }

    /// Writer-side probe. Tracks the first tombstone so a miss doubles as
    /// an insertion hint.
    pub(crate) fn lookup(&self, _w: &MapWriter, key: &K) -> WriteLookup {
        let mut idx = self.hash_index(key);
        let mut first_tombstone = NULL_IDX;
        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            match slot.state.load(Ordering::Relaxed) {
                STATE_EMPTY => {
                    let insert_idx = if first_tombstone != NULL_IDX {
                        first_tombstone
                    } else {
                        idx as u32
                    };
                    return WriteLookup::Miss { insert_idx };
                }
                STATE_DELETED => {
                    if first_tombstone == NULL_IDX {
                        first_tombstone = idx as u32;
                    }
                }
                _ => {
                    // SAFETY: occupied slot under the writer lock; the key
                    // is initialized and nobody else writes it.
                    let stored = unsafe { (*slot.key.get()).assume_init() };
                    if stored == *key {
                        return WriteLookup::Found { idx: idx as u32 };
                    }
                }
            }
            idx = self.next_slot(idx);
        }
        // Half the table is always Empty, so an un-terminated probe means
        // corrupted state, not a full table.
        panic!("flat map probe exhausted the table: state corrupted");
    }

    /// Pure probe for the slot where `key` should be planted: the first
    /// tombstone on the probe path, else the terminating empty slot.
    pub(crate) fn assign_slot(&self, _w: &MapWriter, key: &K) -> u32 {
        let mut idx = self.hash_index(key);
        let mut first_tombstone = NULL_IDX;
        for _ in 0..self.slots.len() {
            match self.slots[idx].state.load(Ordering::Relaxed) {
                STATE_EMPTY => {
                    return if first_tombstone != NULL_IDX {
                        first_tombstone
                    } else {
                        idx as u32
                    };
                }
                STATE_DELETED => {
                    if first_tombstone == NULL_IDX {
                        first_tombstone = idx as u32;
                    }
                }
                _ => {}
            }
            idx = self.next_slot(idx);
        }
        panic!("flat map probe exhausted the table: state corrupted");
    }

    /// Publishes a new entry into an Empty or Deleted slot.
    pub(crate) fn emplace_at(&self, w: &mut MapWriter, idx: u32, key: K, handle: ValueHandle<V>) {
        let slot = &self.slots[idx as usize];
        debug_assert_ne!(slot.state.load(Ordering::Relaxed), STATE_OCCUPIED);

        let gen = slot.gen.load(Ordering::Relaxed);
        slot.gen.store(gen.wrapping_add(1), Ordering::Release);
        // Volatile pairs with the reader's volatile snapshot; any reader
        // racing this store sees the odd generation and discards.
        unsafe { ptr::write_volatile(slot.key.get(), MaybeUninit::new(key)) };
        slot.value.store(handle.into_raw(), Ordering::Release);
        slot.state.store(STATE_OCCUPIED, Ordering::Release);
        slot.gen.store(gen.wrapping_add(2), Ordering::Release);

        slot.prev.set(NULL_IDX);
        slot.next.set(NULL_IDX);
        w.len += 1;
    }

    /// Replaces the value of an Occupied slot in place, returning the
    /// displaced handle for retirement.
    pub(crate) fn update_slot(
        &self,
        _w: &mut MapWriter,
        idx: u32,
        handle: ValueHandle<V>,
    ) -> ValueHandle<V> {
        let slot = &self.slots[idx as usize];
        debug_assert_eq!(slot.state.load(Ordering::Relaxed), STATE_OCCUPIED);

        let gen = slot.gen.load(Ordering::Relaxed);
        slot.gen.store(gen.wrapping_add(1), Ordering::Release);
        let old = slot.value.swap(handle.into_raw(), Ordering::AcqRel);
        slot.state.store(STATE_OCCUPIED, Ordering::Release);
        slot.gen.store(gen.wrapping_add(2), Ordering::Release);

        debug_assert!(!old.is_null());
        // SAFETY: the slot owned this reference; it is now ours to retire.
        unsafe { ValueHandle::from_raw(old) }
    }

    /// Unlinks and tombstones an Occupied slot, returning its value handle
    /// for retirement. No-op on anything else.
    pub(crate) fn erase_index(&self, w: &mut MapWriter, idx: u32) -> Option<ValueHandle<V>> {
        if idx == NULL_IDX {
            return None;
        }
        let slot = &self.slots[idx as usize];
        if slot.state.load(Ordering::Relaxed) != STATE_OCCUPIED {
            return None;
        }

        self.detach(w, idx);

        let gen = slot.gen.load(Ordering::Relaxed);
        slot.gen.store(gen.wrapping_add(1), Ordering::Release);
        let old = slot.value.swap(ptr::null_mut(), Ordering::AcqRel);
        slot.state.store(STATE_DELETED, Ordering::Release);
        slot.gen.store(gen.wrapping_add(2), Ordering::Release);

        w.len -= 1;
        debug_assert!(!old.is_null());
        // SAFETY: the slot owned this reference; it is now ours to retire.
        Some(unsafe { ValueHandle::from_raw(old) })
    }

    /// Splices a slot to the head of the recency list. Idempotent when the
    /// slot is already the head; a freshly planted slot is simply linked in.
    pub(crate) fn move_to_front(&self, w: &mut MapWriter, idx: u32) {
        if idx == NULL_IDX || w.head == idx {
            return;
        }
        self.detach(w, idx);
        self.push_front(w, idx);
    }

    fn detach(&self, w: &mut MapWriter, idx: u32) {
        let slot = &self.slots[idx as usize];
        let next = slot.next.get();
        let prev = slot.prev.get();

        // A freshly planted slot is not on the chain yet; nothing to unlink.
        // (A linked slot with both links null would be the head, which the
        // callers rule out.)
        if next == NULL_IDX && prev == NULL_IDX && w.head != idx {
            return;
        }

        if next != NULL_IDX {
            self.slots[next as usize].prev.set(prev);
        } else {
            w.tail = prev;
        }
        if prev != NULL_IDX {
            self.slots[prev as usize].next.set(next);
        } else {
            w.head = next;
        }
        slot.next.set(NULL_IDX);
        slot.prev.set(NULL_IDX);
    }

    fn push_front(&self, w: &mut MapWriter, idx: u32) {
        let slot = &self.slots[idx as usize];
        let old_head = w.head;
        slot.next.set(old_head);
        slot.prev.set(NULL_IDX);
        if old_head != NULL_IDX {
            self.slots[old_head as usize].prev.set(idx);
        }
        w.head = idx;
        if w.tail == NULL_IDX {
            w.tail = idx;
        }
    }

    /// Whether the slot still carries the generation a trace observed.
    /// Stale traces answer `false` and are silently dropped by the caller.
    #[inline]
    pub(crate) fn is_valid_gen(&self, idx: u32, gen: u32) -> bool {
        let slot = &self.slots[idx as usize];
        slot.state.load(Ordering::Relaxed) == STATE_OCCUPIED
            && slot.gen.load(Ordering::Relaxed) == gen
    }

    /// Borrow of the value at an Occupied slot, for the quiet-update
    /// comparison. The borrow ties to the `MapWriter`, so the slot cannot
    /// be mutated while the reference lives.
    pub(crate) fn value_at<'a>(&'a self, _w: &'a MapWriter, idx: u32) -> Option<&'a V> {
        let raw = self.slots[idx as usize].value.load(Ordering::Acquire);
        if raw.is_null() {
            None
        } else {
            // SAFETY: under the writer lock the pointer stays valid and
            // unmodified for the borrow's lifetime.
            Some(unsafe { ValueBox::value_ref(raw) })
        }
    }

    /// Recency order, head first. Test-only inspection.
    #[cfg(test)]
    fn order(&self, w: &MapWriter) -> Vec<u32> {
        let mut out = Vec::new();
        let mut idx = w.head;
        while idx != NULL_IDX {
            out.push(idx);
            idx = self.slots[idx as usize].next.get();
            assert!(out.len() <= self.slots.len(), "recency list contains a cycle");
        }
        out
    }
}

impl<K, V, S> Drop for LinkedFlatMap<K, V, S> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let raw = slot.value.swap(ptr::null_mut(), Ordering::Relaxed);
            if !raw.is_null() {
                // SAFETY: exclusive access in Drop; the slot owned this
                // reference.
                drop(unsafe { ValueHandle::<V>::from_raw(raw) });
            }
        }
        // Keys are Copy and need no teardown.
    }
}

impl<K, V, S> core::fmt::Debug for LinkedFlatMap<K, V, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkedFlatMap")
            .field("table_size", &self.slots.len())
            .finish()
    }
}
