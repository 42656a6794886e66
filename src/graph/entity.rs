//! Entity records: the processing nodes of the graph.

use super::PadId;
use crate::stage::Stage;
use std::sync::Mutex;

/// Maximum pads an entity may carry in each direction.
pub const MAX_PADS_PER_DIRECTION: usize = 10;

/// A processing node wrapping one [`Stage`].
///
/// Pad counts are fixed at creation. The stage sits behind a mutex so the
/// dispatcher can call `process` with `&mut` access while the graph itself
/// is only read-locked.
pub struct Entity {
    name: String,
    source_pads: Vec<PadId>,
    sink_pads: Vec<PadId>,
    stage: Mutex<Box<dyn Stage>>,
    /// True while no sink pad has an inbound remote link.
    is_root: bool,
}

impl Entity {
    pub(crate) fn new(
        name: String,
        source_pads: Vec<PadId>,
        sink_pads: Vec<PadId>,
        stage: Box<dyn Stage>,
    ) -> Self {
        Self {
            name,
            source_pads,
            sink_pads,
            stage: Mutex::new(stage),
            is_root: true,
        }
    }

    /// Name of the backing stage, fixed at creation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source pads, in declaration order.
    pub fn source_pads(&self) -> &[PadId] {
        &self.source_pads
    }

    /// Sink pads, in declaration order.
    pub fn sink_pads(&self) -> &[PadId] {
        &self.sink_pads
    }

    /// Whether this entity is a traversal root (no inbound remote link on
    /// any sink pad).
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub(crate) fn set_root(&mut self, root: bool) {
        self.is_root = root;
    }

    pub(crate) fn stage(&self) -> &Mutex<Box<dyn Stage>> {
        &self.stage
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("source_pads", &self.source_pads)
            .field("sink_pads", &self.sink_pads)
            .field("is_root", &self.is_root)
            .finish_non_exhaustive()
    }
}
