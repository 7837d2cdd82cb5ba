//! # texflow: GPU frame pipeline with throttled fan-out
//!
//! Live video frames (a texture handle plus a 4x4 transform) travel through a
//! reconfigurable chain of stages and are fanned out to any number of
//! independently configured render targets.
//!
//! ## Architecture
//!
//! - **Pipeline**: arena graph of nodes, each holding one stage (capture,
//!   effect, mask, histogram, surface sink, distributor...)
//! - **Distribution**: an engine that owns a GPU thread and draws every frame
//!   into its targets with per-target throttling and mirroring
//! - **GPU seam**: traits for contexts, surfaces and drawers, plus a headless
//!   software backend
//! - **Communication**: crossbeam channels between controller threads, the
//!   GPU thread and the callback worker
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use texflow::distribute::{ContextMode, DistributionEngine};
//! use texflow::gpu::headless::{HeadlessContext, HeadlessSurface, RecordingDrawerFactory};
//! use texflow::pipeline::{chain, nodes::{DistributorStage, ProxyStage}, PipelineGraph, TargetId};
//!
//! let graph = PipelineGraph::new()?;
//! let engine = DistributionEngine::new(
//!     "main",
//!     ContextMode::Independent(Arc::new(HeadlessContext::new())),
//!     Arc::new(RecordingDrawerFactory::new()),
//! )?;
//! engine.add_target(TargetId(1), HeadlessSurface::window(1280, 720), false, 30.0)?;
//!
//! let head = graph.add_node(ProxyStage::new());
//! let sink = graph.add_node(DistributorStage::new(engine.clone()));
//! chain::append(&graph, head, sink)?;
//! graph.on_frame(head, &frame);
//! ```

pub mod config;
pub mod distribute;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::TexflowConfig;
pub use distribute::{ContextMode, DistributionEngine};
pub use error::{Result, TexflowError};
pub use pipeline::{NodeId, PipelineError, PipelineGraph, PipelineResult, TargetId};
pub use types::{Color, Frame, Matrix4, MirrorMode, TextureId};
