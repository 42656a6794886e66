//! The dispatcher: a single worker thread that serializes all event
//! traversal.
//!
//! Producers post [`MediaEvent`]s into a bounded queue from any context;
//! the dispatcher drains it in FIFO order and walks each event through the
//! graph under a read lock. Concurrent traversals never happen, so stages
//! see at most one [`process`](crate::stage::Stage::process) call at a
//! time and topology writers only wait for the current event to finish.

mod event;

pub use event::{EventKind, EventQueue, MediaEvent};

use crate::error::{Error, Result};
use crate::graph::MediaGraph;
use event::QueueMessage;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Default depth of the dispatcher queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Handle to the dispatcher thread.
///
/// Dropping the handle shuts the thread down; [`shutdown`](Dispatcher::shutdown)
/// does the same but surfaces a panic in the dispatcher as an error.
pub struct Dispatcher {
    tx: kanal::Sender<QueueMessage>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Spawn the dispatcher thread over `graph` with a queue of `capacity`
    /// events, returning the thread handle and a posting handle.
    ///
    /// More posting handles can be cloned from the returned [`EventQueue`].
    pub fn spawn(
        graph: Arc<RwLock<MediaGraph>>,
        capacity: usize,
    ) -> Result<(Dispatcher, EventQueue)> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("queue capacity must be > 0".into()));
        }
        let (tx, rx) = kanal::bounded(capacity);
        let handle = std::thread::Builder::new()
            .name("vidgraph-dispatch".into())
            .spawn(move || run(graph, rx))?;
        Ok((
            Dispatcher {
                tx: tx.clone(),
                handle: Some(handle),
            },
            EventQueue::new(tx),
        ))
    }

    /// Stop the dispatcher: queued events ahead of the shutdown marker are
    /// still handled, then the thread exits and is joined.
    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.tx.send(QueueMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::QueueClosed)?;
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(QueueMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run(graph: Arc<RwLock<MediaGraph>>, rx: kanal::Receiver<QueueMessage>) {
    tracing::debug!("dispatcher running");
    while let Ok(message) = rx.recv() {
        let event = match message {
            QueueMessage::Event(event) => event,
            QueueMessage::Shutdown => break,
        };
        tracing::trace!(kind = ?event.kind, origin = %event.origin, "dispatching event");
        let guard = graph.read().unwrap();
        if let Err(err) = guard.walk(event.origin, event.kind, event.element) {
            tracing::warn!(origin = %event.origin, error = %err, "event traversal failed");
        }
    }
    tracing::debug!("dispatcher stopped");
}
