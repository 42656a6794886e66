//! Frame-buffer pool allocator.
//!
//! Every pipeline owns one [`BufferPool`]: a fixed number of fixed-size,
//! aligned element slots carved out of a single contiguous arena. Producers
//! check elements out with [`BufferPool::alloc`] (non-blocking, safe from
//! interrupt context), fill them, and hand them to the dispatcher; elements
//! return to the pool when dropped.

mod arena;
mod bitmap;
mod pool;

pub use pool::{BufferElement, BufferPool, Placement, PoolConfig};
