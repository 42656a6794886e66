//! End-to-end pipeline tests: build a capture -> process -> consume chain,
//! stream frames through it synchronously and check buffer accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vidgraph::buffer::{BufferElement, BufferPool};
use vidgraph::dispatch::EventKind;
use vidgraph::graph::{EntityId, MediaGraph, PadDirection, PadId, PipelineId};
use vidgraph::stage::{BufferRequirement, ProcessOutcome, Stage};
use vidgraph::Error;

/// A stage that counts deliveries, optionally transforms the frame in
/// place, and forwards it.
struct PassStage {
    label: &'static str,
    requirement: BufferRequirement,
    processed: Arc<AtomicUsize>,
    transform: Option<fn(&mut BufferElement)>,
}

impl PassStage {
    fn new(label: &'static str, element_size: usize, count: usize) -> Self {
        Self {
            label,
            requirement: BufferRequirement::new(element_size, count),
            processed: Arc::new(AtomicUsize::new(0)),
            transform: None,
        }
    }
}

impl Stage for PassStage {
    fn buffer_requirement(&self) -> BufferRequirement {
        self.requirement
    }

    fn bind_pool(&mut self, _pool: BufferPool) {}

    fn unbind_pool(&mut self) {}

    fn process(
        &mut self,
        _pad: PadId,
        _kind: EventKind,
        mut element: Option<BufferElement>,
    ) -> ProcessOutcome {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if let (Some(transform), Some(element)) = (self.transform, element.as_mut()) {
            transform(element);
        }
        ProcessOutcome::Continue(element)
    }

    fn name(&self) -> &str {
        self.label
    }
}

/// A terminal stage that keeps every frame it receives, like a user-facing
/// node queueing finished frames for an application.
struct CollectStage {
    frames: Arc<Mutex<Vec<BufferElement>>>,
}

impl Stage for CollectStage {
    fn buffer_requirement(&self) -> BufferRequirement {
        BufferRequirement::new(1024, 2)
    }

    fn bind_pool(&mut self, _pool: BufferPool) {}

    fn unbind_pool(&mut self) {}

    fn process(
        &mut self,
        _pad: PadId,
        _kind: EventKind,
        element: Option<BufferElement>,
    ) -> ProcessOutcome {
        if let Some(element) = element {
            self.frames.lock().unwrap().push(element);
        }
        ProcessOutcome::Deferred
    }

    fn name(&self) -> &str {
        "collector"
    }
}

fn add_bridged(graph: &mut MediaGraph, stage: impl Stage + 'static) -> (EntityId, PadId, PadId) {
    let entity = graph.add_entity(1, 1, Box::new(stage)).unwrap();
    let src = graph.entity_pad(entity, PadDirection::Source, 0).unwrap();
    let snk = graph.entity_pad(entity, PadDirection::Sink, 0).unwrap();
    graph.bridge(src, snk).unwrap();
    (entity, src, snk)
}

/// capture -> isp -> collector, pool built from the union of requirements,
/// entry at the capture sink.
fn camera_chain(
    graph: &mut MediaGraph,
) -> (
    PipelineId,
    PadId,
    Arc<AtomicUsize>,
    Arc<AtomicUsize>,
    Arc<Mutex<Vec<BufferElement>>>,
) {
    let capture = PassStage::new("capture", 640 * 480 * 2, 3);
    let isp = PassStage::new("isp", 640 * 480 * 2, 2);
    let capture_count = Arc::clone(&capture.processed);
    let isp_count = Arc::clone(&isp.processed);

    let (_, cap_src, cap_snk) = add_bridged(graph, capture);
    let (_, isp_src, isp_snk) = add_bridged(graph, isp);

    let frames = Arc::new(Mutex::new(Vec::new()));
    let (_, col_src, col_snk) = add_bridged(
        graph,
        CollectStage {
            frames: Arc::clone(&frames),
        },
    );

    graph.link(cap_src, isp_snk).unwrap();
    graph.link(isp_src, col_snk).unwrap();

    let pipeline = graph.add_pipeline();
    graph.set_entry_pad(pipeline, cap_snk).unwrap();
    graph.set_terminal_pad(pipeline, col_src).unwrap();
    graph.build_buffer_pool(pipeline).unwrap();

    (pipeline, cap_snk, capture_count, isp_count, frames)
}

#[test]
fn frames_flow_capture_to_collector() {
    let mut graph = MediaGraph::new();
    let (pipeline, entry, capture_count, isp_count, frames) = camera_chain(&mut graph);

    for i in 0..3u8 {
        let mut element = graph.alloc_buffer(pipeline).unwrap();
        element.write(&[i; 16]);
        graph
            .walk(entry, EventKind::DataArrived, Some(element))
            .unwrap();
    }

    assert_eq!(capture_count.load(Ordering::SeqCst), 3);
    assert_eq!(isp_count.load(Ordering::SeqCst), 3);

    let collected = frames.lock().unwrap();
    assert_eq!(collected.len(), 3);
    for (i, frame) in collected.iter().enumerate() {
        assert_eq!(frame.bytes(), &[i as u8; 16]);
    }

    // All three frames are deferred in the collector, none leaked.
    let pool = graph.pipeline(pipeline).unwrap().pool().unwrap();
    assert_eq!(pool.outstanding(), 3);
}

#[test]
fn releasing_collected_frames_returns_them_to_the_pool() {
    let mut graph = MediaGraph::new();
    let (pipeline, entry, _, _, frames) = camera_chain(&mut graph);

    let element = graph.alloc_buffer(pipeline).unwrap();
    graph
        .walk(entry, EventKind::DataArrived, Some(element))
        .unwrap();

    let pool = graph.pipeline(pipeline).unwrap().pool().unwrap().clone();
    assert_eq!(pool.outstanding(), 1);

    frames.lock().unwrap().clear();
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.available(), pool.capacity());
}

#[test]
fn pool_exhaustion_is_an_error_not_a_hang() {
    let mut graph = MediaGraph::new();
    let (pipeline, _, _, _, _) = camera_chain(&mut graph);

    let capacity = graph
        .pipeline(pipeline)
        .unwrap()
        .pool()
        .unwrap()
        .capacity();
    let mut held = Vec::new();
    for _ in 0..capacity {
        held.push(graph.alloc_buffer(pipeline).unwrap());
    }
    assert!(matches!(
        graph.alloc_buffer(pipeline),
        Err(Error::PoolExhausted)
    ));

    held.pop();
    assert!(graph.alloc_buffer(pipeline).is_ok());
}

#[test]
fn topology_change_with_frames_in_flight_is_refused() {
    let mut graph = MediaGraph::new();
    let (pipeline, entry, _, _, frames) = camera_chain(&mut graph);

    let element = graph.alloc_buffer(pipeline).unwrap();
    graph
        .walk(entry, EventKind::DataArrived, Some(element))
        .unwrap();

    // One frame is parked in the collector, so anything that would tear the
    // pool down must refuse.
    assert!(matches!(
        graph.destroy_buffer_pool(pipeline),
        Err(Error::PoolBusy { .. })
    ));
    assert!(matches!(
        graph.remove_pipeline(pipeline),
        Err(Error::PoolBusy { .. })
    ));

    frames.lock().unwrap().clear();
    graph.remove_pipeline(pipeline).unwrap();
}

#[test]
fn stop_and_cleanup_tear_the_graph_down() {
    let mut graph = MediaGraph::new();
    let (pipeline, _, _, _, _) = camera_chain(&mut graph);

    graph.start_pipeline(pipeline).unwrap();
    graph.stop_pipeline(pipeline).unwrap();
    graph.cleanup().unwrap();

    assert_eq!(graph.entity_ids().count(), 0);
    assert_eq!(graph.pipeline_ids().count(), 0);
}
