//! Buffer pool with checkout semantics.

use super::arena::SlotArena;
use super::bitmap::AtomicBitmap;
use crate::error::{Error, Result};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Memory-placement requirement flags for pool storage.
///
/// Stages report where their DMA engines or algorithms need frame memory to
/// live; a pipeline pool is built with the union of every reachable stage's
/// flags. On a hosted target these are advisory, but the union is preserved
/// so drivers can inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Placement(u32);

impl Placement {
    /// No placement constraint.
    pub const ANY: Placement = Placement(0);
    /// Must live in internal RAM.
    pub const INTERNAL: Placement = Placement(1 << 0);
    /// May live in external RAM (e.g. SPI-attached PSRAM).
    pub const EXTERNAL: Placement = Placement(1 << 1);
    /// Must be reachable by DMA.
    pub const DMA_CAPABLE: Placement = Placement(1 << 2);

    /// Raw flag bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set in `self`.
    pub fn contains(self, other: Placement) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Placement {
    type Output = Placement;

    fn bitor(self, rhs: Placement) -> Placement {
        Placement(self.0 | rhs.0)
    }
}

impl BitOrAssign for Placement {
    fn bitor_assign(&mut self, rhs: Placement) {
        self.0 |= rhs.0;
    }
}

/// Geometry and placement of a buffer pool, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of elements.
    pub count: usize,
    /// Usable size of each element in bytes.
    pub element_size: usize,
    /// Required storage alignment (power of 2).
    pub align: usize,
    /// Memory-placement requirement flags.
    pub placement: Placement,
}

/// Default element alignment when no stage asks for more.
pub(crate) const DEFAULT_ALIGN: usize = 4;

impl PoolConfig {
    /// Config with the default alignment and no placement constraint.
    pub fn new(count: usize, element_size: usize) -> Self {
        Self {
            count,
            element_size,
            align: DEFAULT_ALIGN,
            placement: Placement::ANY,
        }
    }
}

struct PoolShared {
    config: PoolConfig,
    /// Element size rounded up to the alignment; slot `i` starts at `i * stride`.
    stride: usize,
    arena: SlotArena,
    bitmap: AtomicBitmap,
}

impl PoolShared {
    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        debug_assert!(slot < self.config.count);
        // SAFETY: slot is in bounds, so the offset stays inside the arena.
        unsafe { self.arena.as_ptr().add(slot * self.stride) }
    }
}

/// A fixed-count, fixed-size pool of frame-buffer elements.
///
/// All elements share one contiguous arena; a lock-free bitmap tracks which
/// slots are checked out, so [`alloc`](BufferPool::alloc) and element return
/// are O(1), never block, and are safe to call from interrupt context.
///
/// `BufferPool` is a cheap-clone handle: cloning shares the same storage.
/// Handles are held by the owning pipeline and by every stage the pool is
/// bound to.
///
/// # Example
///
/// ```rust
/// use vidgraph::buffer::{BufferPool, PoolConfig};
///
/// let pool = BufferPool::new(PoolConfig::new(4, 64)).unwrap();
/// let mut element = pool.alloc().unwrap();
/// element.write(b"frame");
/// assert_eq!(pool.outstanding(), 1);
/// drop(element); // back on the free list
/// assert_eq!(pool.outstanding(), 0);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with `config.count` elements of `config.element_size`
    /// bytes each.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.count == 0 {
            return Err(Error::InvalidArgument("pool count must be > 0".into()));
        }
        if config.element_size == 0 {
            return Err(Error::InvalidArgument(
                "pool element size must be > 0".into(),
            ));
        }
        if !config.align.is_power_of_two() {
            return Err(Error::InvalidArgument(
                "pool alignment must be a power of 2".into(),
            ));
        }

        let stride = config.element_size.div_ceil(config.align) * config.align;
        let arena = SlotArena::new(stride * config.count, config.align)?;

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                stride,
                arena,
                bitmap: AtomicBitmap::new(config.count),
            }),
        })
    }

    /// Create a new pool with the same geometry but fresh storage.
    pub fn clone_empty(&self) -> Result<Self> {
        Self::new(self.shared.config)
    }

    /// Check one element out of the pool.
    ///
    /// The element's valid size is reset to 0. O(1), non-blocking,
    /// interrupt-safe. Returns [`Error::PoolExhausted`] when every element
    /// is checked out.
    pub fn alloc(&self) -> Result<BufferElement> {
        let slot = self.shared.bitmap.acquire().ok_or(Error::PoolExhausted)?;
        Ok(BufferElement {
            shared: Arc::clone(&self.shared),
            slot,
            valid_size: 0,
            valid_offset: 0,
        })
    }

    /// Total element count.
    pub fn capacity(&self) -> usize {
        self.shared.config.count
    }

    /// Usable size of each element in bytes.
    pub fn element_size(&self) -> usize {
        self.shared.config.element_size
    }

    /// The configuration this pool was created with.
    pub fn config(&self) -> PoolConfig {
        self.shared.config
    }

    /// Number of elements currently on the free list. Snapshot only.
    pub fn available(&self) -> usize {
        self.shared.bitmap.free_count()
    }

    /// Number of elements currently checked out. Snapshot only.
    pub fn outstanding(&self) -> usize {
        self.shared.bitmap.outstanding()
    }

    /// Whether `other` is a handle to the same storage.
    pub fn same_pool(&self, other: &BufferPool) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Tear the pool down.
    ///
    /// Fails when any element is still checked out, handing the intact pool
    /// back so the caller can wait for outstanding buffers to drain and
    /// retry. Storage is released once the last handle is gone.
    pub fn destroy(self) -> std::result::Result<(), BufferPool> {
        if self.outstanding() == 0 {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("count", &self.capacity())
            .field("element_size", &self.element_size())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// A frame-buffer element checked out of a [`BufferPool`].
///
/// Exactly one owner holds an element at a time; dropping it returns the
/// slot to the pool's free list (this is also how a deferred holder releases
/// a buffer it kept past the traversal that delivered it). The valid window
/// (`valid_offset..valid_offset + valid_size`) marks the bytes a producer
/// actually filled.
pub struct BufferElement {
    shared: Arc<PoolShared>,
    slot: usize,
    valid_size: usize,
    valid_offset: usize,
}

impl BufferElement {
    /// Usable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.shared.config.element_size
    }

    /// Slot index within the pool.
    pub fn slot_index(&self) -> usize {
        self.slot
    }

    /// Number of valid bytes.
    pub fn valid_size(&self) -> usize {
        self.valid_size
    }

    /// Set the number of valid bytes.
    ///
    /// # Panics
    ///
    /// Panics if the valid window would exceed the element capacity.
    pub fn set_valid_size(&mut self, valid_size: usize) {
        assert!(
            self.valid_offset + valid_size <= self.capacity(),
            "valid window exceeds element capacity"
        );
        self.valid_size = valid_size;
    }

    /// Offset of the first valid byte.
    pub fn valid_offset(&self) -> usize {
        self.valid_offset
    }

    /// Set the offset of the first valid byte.
    ///
    /// # Panics
    ///
    /// Panics if the valid window would exceed the element capacity.
    pub fn set_valid_offset(&mut self, valid_offset: usize) {
        assert!(
            valid_offset + self.valid_size <= self.capacity(),
            "valid window exceeds element capacity"
        );
        self.valid_offset = valid_offset;
    }

    /// The valid bytes of this element.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: exclusive checkout of this slot; window bounds are upheld
        // by the setters.
        unsafe {
            std::slice::from_raw_parts(
                self.shared.slot_ptr(self.slot).add(self.valid_offset),
                self.valid_size,
            )
        }
    }

    /// The whole element storage, regardless of the valid window.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: exclusive checkout of this slot plus &mut self.
        unsafe {
            std::slice::from_raw_parts_mut(self.shared.slot_ptr(self.slot), self.capacity())
        }
    }

    /// Copy `data` to the start of the element and mark it valid.
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds the element capacity.
    pub fn write(&mut self, data: &[u8]) {
        assert!(
            data.len() <= self.capacity(),
            "data ({} bytes) exceeds element capacity ({} bytes)",
            data.len(),
            self.capacity()
        );
        self.as_mut_slice()[..data.len()].copy_from_slice(data);
        self.valid_offset = 0;
        self.valid_size = data.len();
    }

    /// Fork this element: check a fresh element out of the same pool and
    /// deep-copy the valid bytes into it.
    ///
    /// Used when a traversal fans out so every branch but the last gets an
    /// independent copy. Fails with [`Error::PoolExhausted`] when the pool
    /// has no free element.
    pub fn fork(&self) -> Result<BufferElement> {
        let slot = self.shared.bitmap.acquire().ok_or(Error::PoolExhausted)?;
        let copy = BufferElement {
            shared: Arc::clone(&self.shared),
            slot,
            valid_size: self.valid_size,
            valid_offset: self.valid_offset,
        };

        let end = self.valid_offset + self.valid_size;
        // SAFETY: both slots are exclusively checked out; end <= capacity.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.shared.slot_ptr(self.slot),
                copy.shared.slot_ptr(copy.slot),
                end,
            );
        }
        Ok(copy)
    }

    /// A handle to the pool this element came from.
    pub fn pool(&self) -> BufferPool {
        BufferPool {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether this element came from `pool`.
    pub fn from_pool(&self, pool: &BufferPool) -> bool {
        Arc::ptr_eq(&self.shared, &pool.shared)
    }
}

impl Drop for BufferElement {
    fn drop(&mut self) {
        self.shared.bitmap.release(self.slot);
    }
}

impl std::fmt::Debug for BufferElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferElement")
            .field("slot", &self.slot)
            .field("valid_size", &self.valid_size)
            .field("valid_offset", &self.valid_offset)
            .field("capacity", &self.capacity())
            .finish()
    }
}
