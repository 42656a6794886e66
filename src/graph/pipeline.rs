//! Pipelines: streaming paths through the graph and their buffer pools.

use super::{EntityId, MediaGraph, PadId, PipelineId};
use crate::buffer::{BufferElement, BufferPool, Placement, PoolConfig};
use crate::error::{Error, Result};
use crate::stage::BufferRequirement;

/// A streaming path through the graph.
///
/// A pipeline is a label stamped onto pads plus an entry pad (where capture
/// hardware injects buffers), an optional terminal pad (the user-facing end)
/// and a lazily built buffer pool shared by every reachable stage.
#[derive(Debug, Default)]
pub struct Pipeline {
    entry: Option<PadId>,
    terminal: Option<PadId>,
    pool: Option<BufferPool>,
}

impl Pipeline {
    /// The entry pad, if one was set.
    pub fn entry_pad(&self) -> Option<PadId> {
        self.entry
    }

    /// The terminal pad, if one was set.
    pub fn terminal_pad(&self) -> Option<PadId> {
        self.terminal
    }

    /// The built buffer pool, if present.
    pub fn pool(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }

    /// Drop entry/terminal references to pads that are going away.
    pub(crate) fn forget_pads(&mut self, pads: &[PadId]) {
        if self.entry.is_some_and(|p| pads.contains(&p)) {
            self.entry = None;
        }
        if self.terminal.is_some_and(|p| pads.contains(&p)) {
            self.terminal = None;
        }
    }
}

impl MediaGraph {
    /// Register an empty pipeline.
    pub fn add_pipeline(&mut self) -> PipelineId {
        let id = PipelineId(self.pipelines.len() as u32);
        self.pipelines.push(Some(Pipeline::default()));
        tracing::debug!(pipeline = %id, "pipeline added");
        id
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline> {
        self.pipeline_ref(id)
    }

    /// Iterate over live pipeline ids.
    pub fn pipeline_ids(&self) -> impl Iterator<Item = PipelineId> + '_ {
        self.pipelines
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(i, _)| PipelineId(i as u32))
    }

    /// Remove a pipeline, tearing down its pool and unstamping its pads.
    ///
    /// Fails with [`Error::PoolBusy`] before anything changes if elements
    /// are still checked out.
    pub fn remove_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.pipeline_ref(id)?;
        self.destroy_pool_inner(id)?;
        for pad in self.pads.iter_mut().flatten() {
            if pad.pipeline == Some(id) {
                pad.pipeline = None;
            }
        }
        self.pipelines[id.index()] = None;
        tracing::debug!(pipeline = %id, "pipeline removed");
        Ok(())
    }

    /// Set the pipeline's entry pad and stamp the pipeline onto every pad
    /// reachable from it.
    ///
    /// Fails before any mutation if any reachable pad is already stamped
    /// with a different pipeline; one region cannot be claimed by two live
    /// pipelines.
    pub fn set_entry_pad(&mut self, id: PipelineId, pad: PadId) -> Result<()> {
        self.pipeline_ref(id)?;
        let reachable = self.reachable_pads(pad);
        if reachable.is_empty() {
            return Err(Error::NotFound(format!("pad {pad}")));
        }
        for &reached in &reachable {
            if let Some(other) = self.pad(reached)?.pipeline {
                if other != id {
                    return Err(Error::InvalidArgument(format!(
                        "pad {reached} already belongs to pipeline {other}"
                    )));
                }
            }
        }
        for reached in reachable {
            self.pad_mut(reached)?.pipeline = Some(id);
        }
        self.pipeline_mut(id)?.entry = Some(pad);
        Ok(())
    }

    /// Set the pipeline's terminal pad, the user-facing end of the path.
    ///
    /// Fails if the pad is stamped with a different pipeline.
    pub fn set_terminal_pad(&mut self, id: PipelineId, pad: PadId) -> Result<()> {
        self.pipeline_ref(id)?;
        if let Some(other) = self.pad(pad)?.pipeline {
            if other != id {
                return Err(Error::InvalidArgument(format!(
                    "pad {pad} already belongs to pipeline {other}"
                )));
            }
        }
        self.pad_mut(pad)?.pipeline = Some(id);
        self.pipeline_mut(id)?.terminal = Some(pad);
        Ok(())
    }

    /// Build (or rebuild) the pipeline's buffer pool from the requirements
    /// of every stage reachable from the entry pad, then bind the pool to
    /// each of those stages.
    ///
    /// The pool is sized to the maximum element size and count, the
    /// least-common-multiple alignment and the union of placement flags.
    /// An existing pool is torn down first; that fails with
    /// [`Error::PoolBusy`] while elements are checked out.
    pub fn build_buffer_pool(&mut self, id: PipelineId) -> Result<()> {
        let entry = self.pipeline_ref(id)?.entry.ok_or_else(|| {
            Error::InvalidArgument(format!("pipeline {id} has no entry pad"))
        })?;
        self.destroy_pool_inner(id)?;

        let entities = self.reachable_entities(entry);
        let mut config = PoolConfig {
            count: 0,
            element_size: 0,
            align: 1,
            placement: Placement::ANY,
        };
        for &entity in &entities {
            let req: BufferRequirement =
                self.entity(entity)?.stage().lock().unwrap().buffer_requirement();
            config.count = config.count.max(req.count);
            config.element_size = config.element_size.max(req.element_size);
            config.align = lcm(config.align, req.align.max(1));
            config.placement |= req.placement;
        }
        if config.count == 0 || config.element_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "no reachable stage of pipeline {id} reports a buffer requirement"
            )));
        }

        let pool = BufferPool::new(config)?;
        for &entity in &entities {
            self.entity(entity)?.stage().lock().unwrap().bind_pool(pool.clone());
        }
        tracing::debug!(
            pipeline = %id,
            count = config.count,
            element_size = config.element_size,
            align = config.align,
            "pipeline buffer pool built"
        );
        self.pipeline_mut(id)?.pool = Some(pool);
        Ok(())
    }

    /// Tear down the pipeline's buffer pool, if built.
    ///
    /// Fails with [`Error::PoolBusy`] while any element is checked out; a
    /// pipeline without a pool is a no-op success.
    pub fn destroy_buffer_pool(&mut self, id: PipelineId) -> Result<()> {
        self.pipeline_ref(id)?;
        self.destroy_pool_inner(id)
    }

    /// Check one element out of the pipeline's pool.
    ///
    /// This is how a capture front-end obtains a buffer to fill before
    /// posting it into the dispatcher.
    pub fn alloc_buffer(&self, id: PipelineId) -> Result<BufferElement> {
        self.pipeline_ref(id)?
            .pool
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument(format!("pipeline {id} has no buffer pool")))?
            .alloc()
    }

    /// Start streaming: walk the reachable stages from the entry pad, top to
    /// bottom, and call [`start`](crate::stage::Stage::start) on each.
    ///
    /// Builds the buffer pool first if it is not already built.
    pub fn start_pipeline(&mut self, id: PipelineId) -> Result<()> {
        if self.pipeline_ref(id)?.pool.is_none() {
            self.build_buffer_pool(id)?;
        }
        let entry = self.pipeline_ref(id)?.entry.ok_or_else(|| {
            Error::InvalidArgument(format!("pipeline {id} has no entry pad"))
        })?;
        for entity in self.reachable_entities(entry) {
            self.entity(entity)?.stage().lock().unwrap().start()?;
        }
        tracing::info!(pipeline = %id, "pipeline started");
        Ok(())
    }

    /// Stop streaming: call [`stop`](crate::stage::Stage::stop) on every
    /// reachable stage, top to bottom. The pool stays built.
    pub fn stop_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let entry = self.pipeline_ref(id)?.entry.ok_or_else(|| {
            Error::InvalidArgument(format!("pipeline {id} has no entry pad"))
        })?;
        for entity in self.reachable_entities(entry) {
            self.entity(entity)?.stage().lock().unwrap().stop()?;
        }
        tracing::info!(pipeline = %id, "pipeline stopped");
        Ok(())
    }

    /// Remove a pipeline together with every entity that belongs only to it.
    ///
    /// An entity is deleted when at least one of its pads is stamped with
    /// this pipeline and none is stamped with another. Fails with
    /// [`Error::PoolBusy`] before anything changes if elements are checked
    /// out.
    pub fn cleanup_pipeline(&mut self, id: PipelineId) -> Result<()> {
        self.pipeline_ref(id)?;
        self.ensure_pool_idle(id)?;

        let mut victims = Vec::new();
        for entity in self.entity_ids() {
            let pads: Vec<PadId> = {
                let e = self.entity(entity)?;
                e.source_pads().iter().chain(e.sink_pads()).copied().collect()
            };
            let mut participates = false;
            let mut foreign = false;
            for pad in pads {
                match self.pad(pad)?.pipeline {
                    Some(p) if p == id => participates = true,
                    Some(_) => foreign = true,
                    None => {}
                }
            }
            if participates && !foreign {
                victims.push(entity);
            }
        }

        for entity in victims {
            self.remove_entity(entity)?;
        }
        self.remove_pipeline(id)
    }

    /// Tear the whole graph down: every pipeline via
    /// [`cleanup_pipeline`](MediaGraph::cleanup_pipeline), then every
    /// remaining entity.
    pub fn cleanup(&mut self) -> Result<()> {
        let pipelines: Vec<PipelineId> = self.pipeline_ids().collect();
        for pipeline in pipelines {
            self.cleanup_pipeline(pipeline)?;
        }
        let entities: Vec<EntityId> = self.entity_ids().collect();
        for entity in entities {
            self.remove_entity(entity)?;
        }
        Ok(())
    }

    /// Fail with [`Error::PoolBusy`] if the pipeline's pool has elements
    /// checked out. Used as a pre-check so topology mutations never leave
    /// the graph half-changed.
    pub(crate) fn ensure_pool_idle(&self, id: PipelineId) -> Result<()> {
        if let Some(pool) = &self.pipeline_ref(id)?.pool {
            let outstanding = pool.outstanding();
            if outstanding > 0 {
                return Err(Error::PoolBusy { outstanding });
            }
        }
        Ok(())
    }

    /// Tear down the pipeline's pool: unbind it from every reachable stage,
    /// then release the storage. No-op if no pool is built.
    pub(crate) fn destroy_pool_inner(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = self.pipeline_ref(id)?;
        if pipeline.pool.is_none() {
            return Ok(());
        }
        self.ensure_pool_idle(id)?;

        if let Some(entry) = self.pipeline_ref(id)?.entry {
            for entity in self.reachable_entities(entry) {
                self.entity(entity)?.stage().lock().unwrap().unbind_pool();
            }
        }

        if let Some(pool) = self.pipeline_mut(id)?.pool.take() {
            if let Err(pool) = pool.destroy() {
                // A holder raced us between the idle check and here; the
                // storage stays alive until the last element drains.
                tracing::warn!(
                    pipeline = %id,
                    outstanding = pool.outstanding(),
                    "pool became busy during teardown, storage retained until drained"
                );
            }
        }
        tracing::debug!(pipeline = %id, "pipeline buffer pool destroyed");
        Ok(())
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}
