//! Events and the posting side of the dispatcher queue.

use crate::buffer::BufferElement;
use crate::error::{Error, Result};
use crate::graph::PadId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What happened at the origin pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Streaming is starting on this path.
    Start,
    /// A filled buffer arrived and should flow downstream.
    DataArrived,
    /// Streaming is stopping on this path.
    Stop,
    /// A control request for the stages on this path.
    Control,
}

/// One unit of work for the dispatcher: an event kind, the pad it
/// originates at, and optionally the buffer element being carried.
///
/// The element moves with the event; if the event is dropped before the
/// dispatcher handles it, the element returns to its pool.
#[derive(Debug)]
pub struct MediaEvent {
    /// What happened.
    pub kind: EventKind,
    /// Pad the traversal starts from.
    pub origin: PadId,
    /// Buffer carried by the event, for [`EventKind::DataArrived`].
    pub element: Option<BufferElement>,
}

impl MediaEvent {
    /// A buffer-less event.
    pub fn new(kind: EventKind, origin: PadId) -> Self {
        Self {
            kind,
            origin,
            element: None,
        }
    }

    /// An event carrying a buffer element.
    pub fn with_element(kind: EventKind, origin: PadId, element: BufferElement) -> Self {
        Self {
            kind,
            origin,
            element: Some(element),
        }
    }
}

/// What travels over the dispatcher channel.
pub(crate) enum QueueMessage {
    Event(MediaEvent),
    Shutdown,
}

/// Cheap-clone posting handle to the dispatcher's bounded queue.
///
/// Producers (capture interrupt handlers, deferred stages, control-plane
/// callers) hold one of these; the dispatcher thread owns the receiving
/// side.
#[derive(Clone)]
pub struct EventQueue {
    pub(super) tx: kanal::Sender<QueueMessage>,
    pub(super) dropped: Arc<AtomicU64>,
}

impl EventQueue {
    pub(super) fn new(tx: kanal::Sender<QueueMessage>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Post an event, blocking up to `timeout` while the queue is full.
    ///
    /// Returns [`Error::Timeout`] if the queue stays full, or
    /// [`Error::QueueClosed`] after the dispatcher shut down; either way
    /// the carried element returns to its pool.
    pub fn post(&self, event: MediaEvent, timeout: Duration) -> Result<()> {
        self.tx
            .send_timeout(QueueMessage::Event(event), timeout)
            .map_err(|err| match err {
                kanal::SendErrorTimeout::Timeout => Error::Timeout,
                _ => Error::QueueClosed,
            })
    }

    /// Post an event without blocking; safe to call from interrupt context.
    ///
    /// When the queue is full the event is dropped on the spot (its element
    /// returns to the pool), the drop counter increments and
    /// [`Error::QueueFull`] is returned. Frame loss under overload is a
    /// deliberate trade: the alternative is blocking an interrupt handler.
    pub fn post_from_isr(&self, event: MediaEvent) -> Result<()> {
        let mut slot = Some(QueueMessage::Event(event));
        match self.tx.try_send_option(&mut slot) {
            Ok(true) => Ok(()),
            Ok(false) => {
                drop(slot);
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "event queue full, event dropped");
                Err(Error::QueueFull)
            }
            Err(_) => Err(Error::QueueClosed),
        }
    }

    /// Post a filled capture buffer as a [`EventKind::DataArrived`] event
    /// from interrupt context, marking `valid_size` bytes valid first.
    pub fn post_buffer_ready(
        &self,
        origin: PadId,
        mut element: BufferElement,
        valid_size: usize,
    ) -> Result<()> {
        element.set_valid_size(valid_size);
        self.post_from_isr(MediaEvent::with_element(
            EventKind::DataArrived,
            origin,
            element,
        ))
    }

    /// Events dropped so far because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("dropped", &self.dropped_events())
            .finish_non_exhaustive()
    }
}
