//! Event traversal: moving a buffer (or a buffer-less notification) through
//! the graph from its origin pad.

use super::{MediaGraph, PadDirection, PadId};
use crate::buffer::BufferElement;
use crate::dispatch::EventKind;
use crate::error::Result;
use crate::stage::ProcessOutcome;

impl MediaGraph {
    /// Walk an event through the graph starting at `origin`.
    ///
    /// From a source pad the event crosses every remote link in link order;
    /// when it carries an element, every branch but the last receives a
    /// [`fork`](BufferElement::fork) and the last receives the original, so
    /// the single-consumer path is zero-copy. At a sink pad the owning
    /// stage's [`process`](crate::stage::Stage::process) runs and its
    /// outcome decides whether the walk continues across the entity's
    /// bridge.
    ///
    /// Branch failures (a failed fork, a stage reporting
    /// [`ProcessOutcome::Failed`]) stop only their own branch; sibling
    /// branches still run and the dropped element returns to its pool.
    /// Fails only when `origin` does not resolve to a live pad.
    pub fn walk(
        &self,
        origin: PadId,
        kind: EventKind,
        element: Option<BufferElement>,
    ) -> Result<()> {
        self.pad(origin)?;
        self.walk_pad(origin, kind, element);
        Ok(())
    }

    fn walk_pad(&self, pad: PadId, kind: EventKind, element: Option<BufferElement>) {
        let Ok(record) = self.pad(pad) else {
            // Pad vanished mid-walk; the element drops back to its pool.
            return;
        };
        match record.direction {
            PadDirection::Source => self.walk_source(pad, kind, element),
            PadDirection::Sink => self.walk_sink(pad, kind, element),
        }
    }

    fn walk_source(&self, pad: PadId, kind: EventKind, element: Option<BufferElement>) {
        let remotes = match self.pad(pad) {
            Ok(record) => record.remotes.clone(),
            Err(_) => return,
        };
        if remotes.is_empty() {
            // Nothing downstream; the element (if any) returns to its pool.
            return;
        }

        let Some(element) = element else {
            for &remote in &remotes {
                self.walk_pad(remote, kind, None);
            }
            return;
        };

        let Some((last, rest)) = remotes.split_last() else {
            return;
        };
        for &remote in rest {
            match element.fork() {
                Ok(copy) => self.walk_pad(remote, kind, Some(copy)),
                Err(err) => {
                    tracing::warn!(%pad, %remote, error = %err, "fan-out fork failed, branch skipped");
                }
            }
        }
        self.walk_pad(*last, kind, Some(element));
    }

    fn walk_sink(&self, pad: PadId, kind: EventKind, element: Option<BufferElement>) {
        let (entity, bridge) = match self.pad(pad) {
            Ok(record) => (record.entity, record.bridge),
            Err(_) => return,
        };
        let Ok(entity_record) = self.entity(entity) else {
            return;
        };

        // The stage lock is released before recursing so a downstream walk
        // can never deadlock against this entity.
        let outcome = entity_record
            .stage()
            .lock()
            .unwrap()
            .process(pad, kind, element);

        let forward = match outcome {
            ProcessOutcome::Continue(element) => element,
            ProcessOutcome::Replace(element) => Some(element),
            ProcessOutcome::Deferred => return,
            ProcessOutcome::Failed(err) => {
                tracing::warn!(
                    %entity,
                    %pad,
                    error = %err,
                    "stage processing failed, branch stopped"
                );
                return;
            }
        };

        if let Some(partner) = bridge {
            self.walk_pad(partner, kind, forward);
        }
        // No bridge: the entity is terminal on this path and the element
        // drops back to its pool here unless the stage deferred it.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::error::Error;
    use crate::graph::EntityId;
    use crate::stage::{BufferRequirement, Stage};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Trace {
        /// (stage label, event kind, payload) per process call.
        calls: Vec<(&'static str, EventKind, Option<Vec<u8>>)>,
        /// Slot index of each element delivered to a stage.
        slots: Vec<usize>,
        /// Elements kept by a deferring stage.
        stash: Vec<BufferElement>,
    }

    /// Behavior of a [`RecordingStage`] after it records the delivery.
    enum Mode {
        Forward,
        Defer,
        Fail,
    }

    struct RecordingStage {
        label: &'static str,
        mode: Mode,
        trace: Arc<Mutex<Trace>>,
    }

    impl RecordingStage {
        fn new(label: &'static str, mode: Mode, trace: &Arc<Mutex<Trace>>) -> Box<Self> {
            Box::new(Self {
                label,
                mode,
                trace: Arc::clone(trace),
            })
        }
    }

    impl Stage for RecordingStage {
        fn buffer_requirement(&self) -> BufferRequirement {
            BufferRequirement::new(64, 4)
        }

        fn bind_pool(&mut self, _pool: BufferPool) {}

        fn unbind_pool(&mut self) {}

        fn process(
            &mut self,
            _pad: PadId,
            kind: EventKind,
            element: Option<BufferElement>,
        ) -> ProcessOutcome {
            let mut trace = self.trace.lock().unwrap();
            trace
                .calls
                .push((self.label, kind, element.as_ref().map(|e| e.bytes().to_vec())));
            if let Some(element) = &element {
                trace.slots.push(element.slot_index());
            }
            match self.mode {
                Mode::Forward => ProcessOutcome::Continue(element),
                Mode::Defer => {
                    if let Some(element) = element {
                        trace.stash.push(element);
                    }
                    ProcessOutcome::Deferred
                }
                Mode::Fail => ProcessOutcome::Failed(Error::NotSupported(
                    "always fails".into(),
                )),
            }
        }

        fn name(&self) -> &str {
            self.label
        }
    }

    fn add_node(
        graph: &mut MediaGraph,
        stage: Box<RecordingStage>,
    ) -> (EntityId, PadId, PadId) {
        let entity = graph.add_entity(1, 1, stage).unwrap();
        let src = graph.entity_pad(entity, PadDirection::Source, 0).unwrap();
        let snk = graph.entity_pad(entity, PadDirection::Sink, 0).unwrap();
        graph.bridge(src, snk).unwrap();
        (entity, src, snk)
    }

    fn pool_and_frame(data: &[u8]) -> (BufferPool, BufferElement) {
        let pool = BufferPool::new(crate::buffer::PoolConfig::new(4, 64)).unwrap();
        let mut element = pool.alloc().unwrap();
        element.write(data);
        (pool, element)
    }

    #[test]
    fn chain_walk_processes_each_stage_once_and_returns_the_buffer() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, a_src, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));
        let (_, b_src, b_snk) = add_node(&mut graph, RecordingStage::new("b", Mode::Forward, &trace));
        let (_, _, c_snk) = add_node(&mut graph, RecordingStage::new("c", Mode::Forward, &trace));
        graph.link(a_src, b_snk).unwrap();
        graph.link(b_src, c_snk).unwrap();

        let (pool, element) = pool_and_frame(b"frame-0");
        let slot = element.slot_index();
        graph.walk(a_snk, EventKind::DataArrived, Some(element)).unwrap();

        let trace = trace.lock().unwrap();
        let labels: Vec<_> = trace.calls.iter().map(|(l, _, _)| *l).collect();
        assert_eq!(labels, vec!["a", "b", "c"]);
        for (_, kind, payload) in &trace.calls {
            assert_eq!(*kind, EventKind::DataArrived);
            assert_eq!(payload.as_deref(), Some(b"frame-0".as_slice()));
        }
        // Single-consumer links are zero-copy: every stage saw the very
        // element that entered, never a fork.
        assert_eq!(trace.slots, vec![slot; 3]);
        // The terminal stage forwarded into an unbridged end, so everything
        // is back in the pool.
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn fan_out_forks_for_all_but_the_last_branch() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, a_src, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));
        let (_, _, b_snk) = add_node(&mut graph, RecordingStage::new("b", Mode::Defer, &trace));
        let (_, _, c_snk) = add_node(&mut graph, RecordingStage::new("c", Mode::Defer, &trace));
        graph.link(a_src, b_snk).unwrap();
        graph.link(a_src, c_snk).unwrap();

        let (pool, element) = pool_and_frame(b"shared");
        graph.walk(a_snk, EventKind::DataArrived, Some(element)).unwrap();

        let mut guard = trace.lock().unwrap();
        // Both consumers saw the same bytes in distinct elements.
        assert_eq!(guard.stash.len(), 2);
        assert_ne!(guard.stash[0].slot_index(), guard.stash[1].slot_index());
        assert!(guard.stash.iter().all(|e| e.bytes() == b"shared"));
        assert_eq!(pool.outstanding(), 2);

        guard.stash.clear();
        drop(guard);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn deferred_element_stays_out_until_dropped() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, a_src, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));
        let (_, _, b_snk) = add_node(&mut graph, RecordingStage::new("b", Mode::Defer, &trace));
        graph.link(a_src, b_snk).unwrap();

        let (pool, element) = pool_and_frame(b"held");
        graph.walk(a_snk, EventKind::DataArrived, Some(element)).unwrap();
        assert_eq!(pool.outstanding(), 1);

        trace.lock().unwrap().stash.clear();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn failed_branch_does_not_affect_siblings() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, a_src, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));
        let (_, _, bad_snk) = add_node(&mut graph, RecordingStage::new("bad", Mode::Fail, &trace));
        let (_, _, ok_snk) = add_node(&mut graph, RecordingStage::new("ok", Mode::Forward, &trace));
        graph.link(a_src, bad_snk).unwrap();
        graph.link(a_src, ok_snk).unwrap();

        let (pool, element) = pool_and_frame(b"payload");
        graph.walk(a_snk, EventKind::DataArrived, Some(element)).unwrap();

        let trace = trace.lock().unwrap();
        let labels: Vec<_> = trace.calls.iter().map(|(l, _, _)| *l).collect();
        assert_eq!(labels, vec!["a", "bad", "ok"]);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn buffer_less_event_reaches_every_branch() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, a_src, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));
        let (_, _, b_snk) = add_node(&mut graph, RecordingStage::new("b", Mode::Forward, &trace));
        let (_, _, c_snk) = add_node(&mut graph, RecordingStage::new("c", Mode::Forward, &trace));
        graph.link(a_src, b_snk).unwrap();
        graph.link(a_src, c_snk).unwrap();

        graph.walk(a_snk, EventKind::Start, None).unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(trace.calls.len(), 3);
        assert!(trace.calls.iter().all(|(_, kind, payload)| {
            *kind == EventKind::Start && payload.is_none()
        }));
    }

    #[test]
    fn source_pad_with_no_links_drops_the_element() {
        let trace = Arc::new(Mutex::new(Trace::default()));
        let mut graph = MediaGraph::new();
        let (_, _, a_snk) = add_node(&mut graph, RecordingStage::new("a", Mode::Forward, &trace));

        let (pool, element) = pool_and_frame(b"orphan");
        graph.walk(a_snk, EventKind::DataArrived, Some(element)).unwrap();

        assert_eq!(trace.lock().unwrap().calls.len(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn walk_from_unknown_pad_fails() {
        let graph = MediaGraph::new();
        assert!(matches!(
            graph.walk(PadId(7), EventKind::Start, None),
            Err(Error::NotFound(_))
        ));
    }
}
