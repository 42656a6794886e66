//! Pad records: the connection points of entities.

use super::{EntityId, PadId, PipelineId};
use smallvec::SmallVec;

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces buffers toward downstream entities.
    Source,
    /// Receives buffers from upstream entities.
    Sink,
}

/// A pad owned by exactly one entity.
///
/// A pad carries at most one *bridge* partner (the intra-entity passthrough
/// to the opposite-direction pad of the same entity) and an ordered list of
/// *remote* partners (cross-entity links; fan-out from a source pad walks
/// them in insertion order). Links are symmetric: every remote appears in
/// both pads' lists, and `a.bridge == b` iff `b.bridge == a`.
#[derive(Debug)]
pub(crate) struct Pad {
    pub(crate) entity: EntityId,
    pub(crate) direction: PadDirection,
    pub(crate) bridge: Option<PadId>,
    pub(crate) remotes: SmallVec<[PadId; 2]>,
    /// The pipeline this pad is currently stamped with, if any.
    pub(crate) pipeline: Option<PipelineId>,
}

impl Pad {
    pub(crate) fn new(entity: EntityId, direction: PadDirection) -> Self {
        Self {
            entity,
            direction,
            bridge: None,
            remotes: SmallVec::new(),
            pipeline: None,
        }
    }
}
