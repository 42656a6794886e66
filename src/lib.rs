//! # vidgraph
//!
//! The media-pipeline core of an embedded camera/video subsystem: a small
//! graph runtime that wires video-producing and video-consuming stages
//! (sensor capture, ISP, encoders, user-facing nodes) into directed
//! pipelines, moves fixed-size frame buffers through the graph with
//! at-most-one-owner semantics, and drives dataflow asynchronously through a
//! bounded event queue that can be fed from interrupt context.
//!
//! ## Architecture
//!
//! - [`buffer`]: fixed-count, fixed-size frame-buffer pools with lock-free
//!   checkout and RAII return
//! - [`graph`]: pads, entities, pipelines and the [`MediaGraph`] registry
//!   holding them, plus the buffer traversal walk
//! - [`stage`]: the capability trait implemented by drivers and algorithms
//!   backing each entity
//! - [`dispatch`]: the bounded event queue and the single worker thread that
//!   drains it
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use vidgraph::prelude::*;
//!
//! let mut graph = MediaGraph::new();
//! let cam = graph.add_entity(1, 1, Box::new(CaptureStage::new()))?;
//! let isp = graph.add_entity(1, 1, Box::new(IspStage::new()))?;
//!
//! // Intra-entity passthrough, then a cross-entity link.
//! graph.bridge(graph.entity_pad(cam, PadDirection::Source, 0)?,
//!              graph.entity_pad(cam, PadDirection::Sink, 0)?)?;
//! graph.bridge(graph.entity_pad(isp, PadDirection::Source, 0)?,
//!              graph.entity_pad(isp, PadDirection::Sink, 0)?)?;
//! graph.link(graph.entity_pad(cam, PadDirection::Source, 0)?,
//!            graph.entity_pad(isp, PadDirection::Sink, 0)?)?;
//!
//! let pipeline = graph.add_pipeline();
//! graph.set_entry_pad(pipeline, graph.entity_pad(cam, PadDirection::Sink, 0)?)?;
//! graph.build_buffer_pool(pipeline)?;
//!
//! let shared = Arc::new(RwLock::new(graph));
//! let (dispatcher, queue) = Dispatcher::spawn(shared, 16)?;
//! // Capture ISR: queue.post_buffer_ready(pad, element, len);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod stage;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::buffer::{BufferElement, BufferPool, Placement, PoolConfig};
    pub use crate::dispatch::{Dispatcher, EventKind, EventQueue, MediaEvent};
    pub use crate::error::{Error, Result};
    pub use crate::graph::{EntityId, MediaGraph, PadDirection, PadId, PipelineId};
    pub use crate::stage::{BufferRequirement, ProcessOutcome, Stage};
}

pub use error::{Error, Result};
pub use graph::MediaGraph;
