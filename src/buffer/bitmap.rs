//! Lock-free atomic bitmap tracking element checkout.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free bitmap recording which pool elements are checked out.
///
/// Each bit is one element slot: 0 = on the free list, 1 = checked out.
/// This is the Rust rendition of a free list guarded by a short critical
/// section: both `acquire` and `release` are bounded and never block, so
/// they are safe to call from interrupt context.
pub(crate) struct AtomicBitmap {
    words: Box<[AtomicU64]>,
    slots: usize,
}

impl AtomicBitmap {
    /// Create a bitmap with every slot free.
    pub(crate) fn new(slots: usize) -> Self {
        let words = (0..slots.div_ceil(64))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { words, slots }
    }

    /// Check out the lowest free slot, or `None` if all are taken.
    pub(crate) fn acquire(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            loop {
                let current = word.load(Ordering::Relaxed);
                if current == u64::MAX {
                    break;
                }

                let bit = (!current).trailing_zeros() as usize;
                let slot = word_idx * 64 + bit;
                if slot >= self.slots {
                    // Only padding bits left past the end.
                    return None;
                }

                match word.compare_exchange_weak(
                    current,
                    current | (1u64 << bit),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(slot),
                    Err(_) => continue,
                }
            }
        }
        None
    }

    /// Return a slot to the free list.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of bounds.
    pub(crate) fn release(&self, slot: usize) {
        assert!(slot < self.slots, "slot index out of bounds");
        self.words[slot / 64].fetch_and(!(1u64 << (slot % 64)), Ordering::Release);
    }

    /// Number of slots currently checked out. Snapshot only.
    pub(crate) fn outstanding(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Number of free slots. Snapshot only.
    pub(crate) fn free_count(&self) -> usize {
        self.slots - self.outstanding()
    }

    /// Total slot count.
    pub(crate) fn capacity(&self) -> usize {
        self.slots
    }
}
