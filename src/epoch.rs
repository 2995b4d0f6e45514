//! Epoch-Based Reclamation Registry
//!
//! Tracks which reader threads are inside a lockless read so the shard
//! writer knows when a retired value can no longer be observed and may be
//! destroyed.
//!
//! The scheme is minimal: one global epoch counter (starting at 1) and one
//! slot per reader id. A reader stamps the current global epoch into its
//! slot on entry and clears it to zero on exit; zero is reserved to mean
//! "not inside a read section" so a single load distinguishes active from
//! idle. Writers bump the global epoch before retiring a value and destroy
//! a retired value only once every nonzero slot has moved past its
//! retirement epoch.
//!
//! All operations are wait-free.

use core::sync::atomic::{fence, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Per-shard epoch registry: global counter plus one padded slot per
/// reader id.
pub(crate) struct EpochRegistry {
    global: CachePadded<AtomicU64>,
    slots: Box<[CachePadded<AtomicU64>]>,
}

impl EpochRegistry {
    pub(crate) fn new(max_threads: usize) -> Self {
        let slots = (0..max_threads)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        EpochRegistry {
            // Epoch 0 means "idle", so the world starts at 1.
            global: CachePadded::new(AtomicU64::new(1)),
            slots,
        }
    }

    /// The current global epoch.
    #[inline]
    pub(crate) fn current(&self) -> u64 {
        self.global.load(Ordering::Relaxed)
    }

    /// Marks `tid` as active in the current epoch. The returned guard
    /// clears the slot when dropped.
    ///
    /// The SeqCst store pairs with the fence in [`min_active`]: either the
    /// writer's scan sees this slot, or every write the writer made before
    /// scanning is visible to loads issued after this call.
    ///
    /// [`min_active`]: EpochRegistry::min_active
    #[inline]
    pub(crate) fn enter(&self, tid: usize) -> EpochGuard<'_> {
        let epoch = self.global.load(Ordering::Acquire);
        self.slots[tid].store(epoch, Ordering::SeqCst);
        EpochGuard {
            registry: self,
            tid,
        }
    }

    #[inline]
    fn leave(&self, tid: usize) {
        self.slots[tid].store(0, Ordering::Release);
    }

    /// Advances the global epoch, returning the previous value.
    #[inline]
    pub(crate) fn bump(&self) -> u64 {
        self.global.fetch_add(1, Ordering::AcqRel)
    }

    /// The smallest epoch any reader is still inside, or the current global
    /// epoch if every slot is idle. Retired values tagged with an epoch
    /// strictly below this bound are unreachable.
    pub(crate) fn min_active(&self) -> u64 {
        fence(Ordering::SeqCst);
        let mut min = self.global.load(Ordering::Acquire);
        for slot in self.slots.iter() {
            let epoch = slot.load(Ordering::Acquire);
            if epoch != 0 && epoch < min {
                min = epoch;
            }
        }
        min
    }
}

impl core::fmt::Debug for EpochRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EpochRegistry")
            .field("global", &self.current())
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Scoped marker for a reader's active epoch; leaving is automatic.
#[must_use]
pub(crate) struct EpochGuard<'a> {
    registry: &'a EpochRegistry,
    tid: usize,
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.registry.leave(self.tid);
    }
}
