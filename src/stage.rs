//! The capability trait implemented by the drivers and algorithms backing
//! each graph entity.
//!
//! The core never touches hardware or pixel data itself: every entity wraps
//! one [`Stage`] (a capture front-end, an ISP block, an encoder, a
//! user-facing node) and talks to it through this interface. Pool sizing,
//! pool binding and per-event processing all flow through here.

use crate::buffer::{BufferElement, BufferPool, Placement};
use crate::dispatch::EventKind;
use crate::error::{Error, Result};
use crate::graph::PadId;

/// A stage's frame-buffer needs, reported while a pipeline pool is built.
///
/// The pipeline pool is sized to the maximum element size and count, the
/// least-common-multiple alignment and the union of placement flags across
/// every reachable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirement {
    /// Largest frame this stage produces or consumes, in bytes.
    pub element_size: usize,
    /// Number of in-flight frames this stage needs.
    pub count: usize,
    /// Storage alignment this stage's DMA or algorithm requires (power of 2).
    pub align: usize,
    /// Memory-placement requirement flags.
    pub placement: Placement,
}

impl BufferRequirement {
    /// A requirement with the default alignment and no placement constraint.
    pub fn new(element_size: usize, count: usize) -> Self {
        Self {
            element_size,
            count,
            align: 1,
            placement: Placement::ANY,
        }
    }
}

/// Outcome of a stage processing one delivery.
///
/// Ownership of the incoming element moves into [`Stage::process`]; the
/// outcome says what the stage did with it, so every case is handled by
/// construction rather than by callback discipline.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Keep going: forward the contained element (usually the one that came
    /// in) to the pad's bridge partner. `None` for buffer-less events.
    Continue(Option<BufferElement>),
    /// The stage swapped the frame for another element (the original was
    /// dropped inside the stage and is already back in its pool); forward
    /// the replacement.
    Replace(BufferElement),
    /// The stage took ownership of the element and will release it later,
    /// from any context, by dropping it or re-posting an event. The branch
    /// stops here.
    Deferred,
    /// Processing failed; the element was reclaimed by its pool when the
    /// stage dropped it. The branch stops here, siblings are unaffected.
    Failed(Error),
}

/// Capability set of the external collaborator behind an entity.
///
/// Implemented outside the core by hardware drivers and image-processing
/// algorithms; the core calls in while building pools, while walking buffers
/// through the graph, and when a caller starts or stops a pipeline.
pub trait Stage: Send {
    /// Report this stage's buffer needs for pipeline pool sizing.
    fn buffer_requirement(&self) -> BufferRequirement;

    /// A pipeline pool was (re)built; keep this handle for allocations.
    fn bind_pool(&mut self, pool: BufferPool);

    /// The bound pool is being torn down; drop any handle kept by
    /// [`bind_pool`](Stage::bind_pool). Must be tolerant of never having
    /// been bound.
    fn unbind_pool(&mut self);

    /// Process one delivery on sink pad `pad`.
    ///
    /// Called by the dispatcher during traversal with the event kind and the
    /// element being walked (`None` for *start*/*stop*/*control* events that
    /// carry no buffer).
    fn process(
        &mut self,
        pad: PadId,
        kind: EventKind,
        element: Option<BufferElement>,
    ) -> ProcessOutcome;

    /// Streaming is starting; invoked by the caller walking the pipeline
    /// top to bottom, not by the dispatcher.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Streaming is stopping.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for debugging and logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
