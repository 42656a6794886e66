//! Contiguous aligned storage backing a buffer pool.

use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// One contiguous, zeroed, aligned allocation holding every element slot of
/// a pool. Elements are views into this arena addressed by slot index; the
/// arena itself never reallocates or moves.
pub(crate) struct SlotArena {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl SlotArena {
    /// Allocate `len` zeroed bytes with the given alignment.
    pub(crate) fn new(len: usize, align: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::AllocationFailed("arena size must be > 0".into()));
        }
        if !align.is_power_of_two() {
            return Err(Error::AllocationFailed(
                "alignment must be a power of 2".into(),
            ));
        }

        let layout = Layout::from_size_align(len, align)
            .map_err(|e| Error::AllocationFailed(e.to_string()))?;
        // SAFETY: layout has non-zero size, checked above.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| {
            Error::AllocationFailed(format!("failed to allocate {len} bytes"))
        })?;

        Ok(Self { ptr, layout })
    }

    /// Base pointer of the arena.
    ///
    /// Mutable access through this pointer is sound only for byte ranges the
    /// caller has exclusive checkout of (enforced by the pool bitmap).
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Total arena size in bytes.
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for SlotArena {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout in `new`.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// The arena is plain bytes; slot checkout serializes access to each range.
unsafe impl Send for SlotArena {}
unsafe impl Sync for SlotArena {}
