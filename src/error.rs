//! Error types for vidgraph.

use thiserror::Error;

/// Result type alias using vidgraph's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vidgraph operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A malformed pad/entity/pipeline reference or a type mismatch
    /// (e.g. bridging two pads of the same direction).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Buffer pool has no free elements.
    #[error("buffer pool exhausted: no free elements")]
    PoolExhausted,

    /// Buffer pool still has elements checked out.
    #[error("buffer pool busy: {outstanding} element(s) still checked out")]
    PoolBusy {
        /// Number of elements not yet returned to the pool.
        outstanding: usize,
    },

    /// Operation referenced an unregistered entity, pad or pipeline.
    #[error("not found: {0}")]
    NotFound(String),

    /// Event queue is full (non-blocking post from interrupt context).
    #[error("event queue full")]
    QueueFull,

    /// Timed out waiting for event queue space (blocking post from task context).
    #[error("timed out waiting for event queue space")]
    Timeout,

    /// Event queue has been shut down.
    #[error("event queue closed")]
    QueueClosed,

    /// The stage backing an entity lacks a requested capability.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
