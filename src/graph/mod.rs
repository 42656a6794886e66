//! The media graph: entities, pads, pipelines and the links between them.
//!
//! All records live in slab-style vectors owned by [`MediaGraph`] and refer
//! to each other by index-backed ids, never by pointer. Topology mutation
//! takes `&mut self`; traversal and queries take `&self`, so the graph can
//! sit behind an `RwLock` shared between the dispatcher and control-plane
//! callers.
//!
//! Two kinds of connection exist. A *bridge* joins a sink pad to a source
//! pad of the same entity (intra-entity passthrough, exclusive on both
//! ends). A *link* joins a source pad to a sink pad of another entity
//! (cross-entity, fan-out capable, ordered). Both are symmetric and both
//! are required for a buffer to flow through an entity and onward.

mod entity;
mod pad;
mod pipeline;
mod walk;

pub use entity::{Entity, MAX_PADS_PER_DIRECTION};
pub use pad::PadDirection;
pub use pipeline::Pipeline;

use crate::error::{Error, Result};
use crate::stage::Stage;
use pad::Pad;
use std::collections::HashSet;
use std::collections::VecDeque;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Slab index behind this id.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Handle to a pad registered in a [`MediaGraph`].
    PadId
);
define_id!(
    /// Handle to an entity registered in a [`MediaGraph`].
    EntityId
);
define_id!(
    /// Handle to a pipeline registered in a [`MediaGraph`].
    PipelineId
);

/// Registry and topology of a media device: every entity, pad and pipeline,
/// plus the bridge and link structure connecting them.
///
/// Ids are never reused; a removed record leaves a tombstone and any stale
/// id held by a caller resolves to [`Error::NotFound`].
#[derive(Debug, Default)]
pub struct MediaGraph {
    entities: Vec<Option<Entity>>,
    pads: Vec<Option<Pad>>,
    pipelines: Vec<Option<Pipeline>>,
}

impl MediaGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // Record accessors. The `Result` forms are for caller-supplied ids; the
    // crate-internal code paths use them too so a tombstone never panics.

    pub(crate) fn pad(&self, id: PadId) -> Result<&Pad> {
        self.pads
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| Error::NotFound(format!("pad {id}")))
    }

    fn pad_mut(&mut self, id: PadId) -> Result<&mut Pad> {
        self.pads
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::NotFound(format!("pad {id}")))
    }

    /// Look up an entity.
    pub fn entity(&self, id: EntityId) -> Result<&Entity> {
        self.entities
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    fn entity_mut(&mut self, id: EntityId) -> Result<&mut Entity> {
        self.entities
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::NotFound(format!("entity {id}")))
    }

    pub(crate) fn pipeline_ref(&self, id: PipelineId) -> Result<&Pipeline> {
        self.pipelines
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| Error::NotFound(format!("pipeline {id}")))
    }

    pub(crate) fn pipeline_mut(&mut self, id: PipelineId) -> Result<&mut Pipeline> {
        self.pipelines
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| Error::NotFound(format!("pipeline {id}")))
    }

    // Entity lifecycle.

    /// Register an entity with fixed pad counts wrapping `stage`.
    ///
    /// Pads start unbridged, unlinked and unstamped; the entity starts as a
    /// root. Fails if either count exceeds [`MAX_PADS_PER_DIRECTION`].
    pub fn add_entity(
        &mut self,
        source_count: usize,
        sink_count: usize,
        stage: Box<dyn Stage>,
    ) -> Result<EntityId> {
        if source_count > MAX_PADS_PER_DIRECTION || sink_count > MAX_PADS_PER_DIRECTION {
            return Err(Error::InvalidArgument(format!(
                "pad count exceeds the per-direction maximum of {MAX_PADS_PER_DIRECTION}"
            )));
        }

        let id = EntityId(self.entities.len() as u32);
        let source_pads = (0..source_count)
            .map(|_| self.push_pad(id, PadDirection::Source))
            .collect();
        let sink_pads = (0..sink_count)
            .map(|_| self.push_pad(id, PadDirection::Sink))
            .collect();

        let name = stage.name().to_string();
        tracing::debug!(entity = %id, name = %name, source_count, sink_count, "entity added");
        self.entities
            .push(Some(Entity::new(name, source_pads, sink_pads, stage)));
        Ok(id)
    }

    fn push_pad(&mut self, entity: EntityId, direction: PadDirection) -> PadId {
        let id = PadId(self.pads.len() as u32);
        self.pads.push(Some(Pad::new(entity, direction)));
        id
    }

    /// Remove an entity, releasing every bridge and link touching its pads
    /// and clearing any pipeline entry or terminal pointing at them.
    ///
    /// Fails with [`Error::PoolBusy`] before anything changes if unlinking
    /// would tear down a pool that still has elements checked out.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<()> {
        let entity = self.entity(id)?;
        let pads: Vec<PadId> = entity
            .source_pads()
            .iter()
            .chain(entity.sink_pads())
            .copied()
            .collect();

        // Sever cross-entity links first; unlink handles pool invalidation
        // and peer root restoration.
        for &pad in &pads {
            let (direction, remotes) = {
                let p = self.pad(pad)?;
                (p.direction, p.remotes.clone())
            };
            for remote in remotes {
                match direction {
                    PadDirection::Source => self.unlink(pad, remote)?,
                    PadDirection::Sink => self.unlink(remote, pad)?,
                }
            }
        }

        // Bridges are internal to the entity; just clear both ends.
        for &pad in &pads {
            if let Some(partner) = self.pad(pad)?.bridge {
                self.pad_mut(partner)?.bridge = None;
            }
            self.pad_mut(pad)?.bridge = None;
        }

        for slot in self.pipelines.iter_mut().flatten() {
            slot.forget_pads(&pads);
        }

        for pad in pads {
            self.pads[pad.index()] = None;
        }
        self.entities[id.index()] = None;
        tracing::debug!(entity = %id, "entity removed");
        Ok(())
    }

    /// Iterate over live entity ids.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| EntityId(i as u32))
    }

    // Pad queries.

    /// The `index`-th pad of `entity` in the given direction.
    pub fn entity_pad(
        &self,
        entity: EntityId,
        direction: PadDirection,
        index: usize,
    ) -> Result<PadId> {
        let entity = self.entity(entity)?;
        let pads = match direction {
            PadDirection::Source => entity.source_pads(),
            PadDirection::Sink => entity.sink_pads(),
        };
        pads.get(index).copied().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "pad index {index} out of range ({} pads)",
                pads.len()
            ))
        })
    }

    /// Owning entity of a pad.
    pub fn pad_entity(&self, pad: PadId) -> Result<EntityId> {
        Ok(self.pad(pad)?.entity)
    }

    /// Direction of a pad.
    pub fn pad_direction(&self, pad: PadId) -> Result<PadDirection> {
        Ok(self.pad(pad)?.direction)
    }

    /// Bridge partner of a pad, if bridged.
    pub fn pad_bridge(&self, pad: PadId) -> Result<Option<PadId>> {
        Ok(self.pad(pad)?.bridge)
    }

    /// Remote link partners of a pad, in link order.
    pub fn pad_remotes(&self, pad: PadId) -> Result<Vec<PadId>> {
        Ok(self.pad(pad)?.remotes.to_vec())
    }

    /// Pipeline a pad is stamped with, if any.
    pub fn pad_pipeline(&self, pad: PadId) -> Result<Option<PipelineId>> {
        Ok(self.pad(pad)?.pipeline)
    }

    /// Whether an entity is currently a traversal root.
    pub fn is_root(&self, entity: EntityId) -> Result<bool> {
        Ok(self.entity(entity)?.is_root())
    }

    // Bridges.

    /// Bridge a source pad to a sink pad of the same entity.
    ///
    /// Exclusive on both ends: bridging a pad that already has a different
    /// partner silently releases the old partnership first. The source pad
    /// inherits the sink pad's pipeline stamp.
    pub fn bridge(&mut self, source: PadId, sink: PadId) -> Result<()> {
        let (source_entity, source_dir) = {
            let p = self.pad(source)?;
            (p.entity, p.direction)
        };
        let (sink_entity, sink_dir, sink_pipeline) = {
            let p = self.pad(sink)?;
            (p.entity, p.direction, p.pipeline)
        };

        if source_dir != PadDirection::Source || sink_dir != PadDirection::Sink {
            return Err(Error::InvalidArgument(
                "bridge requires a source pad and a sink pad".into(),
            ));
        }
        if source_entity != sink_entity {
            return Err(Error::InvalidArgument(
                "bridge pads must belong to the same entity".into(),
            ));
        }

        if let Some(old) = self.pad(source)?.bridge {
            if old != sink {
                self.pad_mut(old)?.bridge = None;
            }
        }
        if let Some(old) = self.pad(sink)?.bridge {
            if old != source {
                self.pad_mut(old)?.bridge = None;
            }
        }

        self.pad_mut(source)?.bridge = Some(sink);
        self.pad_mut(sink)?.bridge = Some(source);
        self.pad_mut(source)?.pipeline = sink_pipeline;
        Ok(())
    }

    // Links.

    /// Link a source pad to a sink pad of a downstream entity.
    ///
    /// Only the directions are checked, so pads of one-direction entities
    /// (pure producers, terminal consumers) are linkable. Idempotent:
    /// relinking an existing pair is a no-op success. The source pad's
    /// pipeline stamp, present or absent, is propagated to every pad
    /// reachable from the sink, and any pipeline whose region this rewrites
    /// has its now-stale pool destroyed; this fails with
    /// [`Error::PoolBusy`] before any mutation if elements are still
    /// checked out.
    pub fn link(&mut self, source: PadId, sink: PadId) -> Result<()> {
        let (source_dir, source_pipeline) = {
            let p = self.pad(source)?;
            (p.direction, p.pipeline)
        };
        let (sink_dir, sink_pipeline, sink_entity) = {
            let p = self.pad(sink)?;
            (p.direction, p.pipeline, p.entity)
        };

        if source_dir != PadDirection::Source || sink_dir != PadDirection::Sink {
            return Err(Error::InvalidArgument(
                "link requires a source pad and a sink pad".into(),
            ));
        }
        if self.pad(source)?.remotes.contains(&sink) {
            return Ok(());
        }

        if let Some(pipeline) = source_pipeline {
            self.ensure_pool_idle(pipeline)?;
        }
        if let Some(pipeline) = sink_pipeline {
            if sink_pipeline != source_pipeline {
                self.ensure_pool_idle(pipeline)?;
            }
        }

        self.pad_mut(source)?.remotes.push(sink);
        self.pad_mut(sink)?.remotes.push(source);
        self.entity_mut(sink_entity)?.set_root(false);

        // Both sides' pools no longer reflect their reachable sets; rebuild
        // lazily.
        if let Some(pipeline) = source_pipeline {
            self.destroy_pool_inner(pipeline)?;
        }
        if let Some(pipeline) = sink_pipeline {
            if sink_pipeline != source_pipeline {
                self.destroy_pool_inner(pipeline)?;
            }
        }

        // The source side's stamp wins downstream, even when it is absent.
        for pad in self.reachable_pads(sink) {
            self.pad_mut(pad)?.pipeline = source_pipeline;
        }

        tracing::debug!(%source, %sink, "pads linked");
        Ok(())
    }

    /// Remove the link between a source pad and a sink pad.
    ///
    /// Unlinking a pair that is not linked is a no-op success. If the sink
    /// entity ends up with no inbound links it becomes a root again. Any
    /// pipeline stamped on either side has its pool invalidated; fails with
    /// [`Error::PoolBusy`] before any mutation if elements are checked out.
    pub fn unlink(&mut self, source: PadId, sink: PadId) -> Result<()> {
        let (source_dir, source_pipeline, linked) = {
            let p = self.pad(source)?;
            (p.direction, p.pipeline, p.remotes.contains(&sink))
        };
        let (sink_dir, sink_pipeline, sink_entity) = {
            let p = self.pad(sink)?;
            (p.direction, p.pipeline, p.entity)
        };

        if source_dir != PadDirection::Source || sink_dir != PadDirection::Sink {
            return Err(Error::InvalidArgument(
                "unlink requires a source pad and a sink pad".into(),
            ));
        }
        if !linked {
            return Ok(());
        }

        let owner = source_pipeline.or(sink_pipeline);
        if let Some(pipeline) = owner {
            self.ensure_pool_idle(pipeline)?;
        }

        self.pad_mut(source)?.remotes.retain(|p| *p != sink);
        self.pad_mut(sink)?.remotes.retain(|p| *p != source);
        self.refresh_root(sink_entity)?;

        if let Some(pipeline) = owner {
            self.destroy_pool_inner(pipeline)?;
        }

        tracing::debug!(%source, %sink, "pads unlinked");
        Ok(())
    }

    /// Recompute the root flag of an entity from its sink pads.
    fn refresh_root(&mut self, entity: EntityId) -> Result<()> {
        let sinks: Vec<PadId> = self.entity(entity)?.sink_pads().to_vec();
        let mut root = true;
        for pad in sinks {
            if !self.pad(pad)?.remotes.is_empty() {
                root = false;
                break;
            }
        }
        self.entity_mut(entity)?.set_root(root);
        Ok(())
    }

    // Reachability.

    /// Every pad reachable downstream from `from`, including `from` itself,
    /// in breadth-first order. From a sink pad the walk crosses its bridge;
    /// from a source pad it crosses every remote link.
    pub fn reachable_pads(&self, from: PadId) -> Vec<PadId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([from]);

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let Ok(pad) = self.pad(id) else {
                continue;
            };
            order.push(id);
            match pad.direction {
                PadDirection::Sink => {
                    if let Some(partner) = pad.bridge {
                        queue.push_back(partner);
                    }
                }
                PadDirection::Source => {
                    for &remote in &pad.remotes {
                        queue.push_back(remote);
                    }
                }
            }
        }
        order
    }

    /// Every entity owning a pad reachable from `from`, deduplicated, in
    /// first-visit (upstream to downstream) order.
    pub fn reachable_entities(&self, from: PadId) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for pad in self.reachable_pads(from) {
            if let Ok(record) = self.pad(pad) {
                if seen.insert(record.entity) {
                    order.push(record.entity);
                }
            }
        }
        order
    }
}
