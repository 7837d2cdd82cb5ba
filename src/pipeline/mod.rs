//! Node-based frame pipeline.
//!
//! Frames flow from a head node through a chain of stages. A node holds one
//! stage and either a single downstream (`Linear`) or a set (`Branch`):
//!
//! ```text
//! [Proxy] ──► [Effect] ──► [Capture] ──► [Branch] ──► [Distributor] ══► targets
//!                                                └──► [Surface]
//! ```
//!
//! # Design
//!
//! - **Arena + handles**: nodes live in one arena inside [`PipelineGraph`];
//!   links are [`NodeId`]s, never pointers.
//! - **Enum dispatch on hot path**: `BuiltinStage` enum for all built-in stages.
//! - **Lock split**: topology behind one lock, each stage behind its own, and
//!   no stage hook ever runs with the topology lock held.
//! - **Errors stay local**: a failing stage is reported on the callback
//!   worker and the original frame keeps flowing.

pub mod chain;
pub mod error;
pub mod events;
pub mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod stage_kind;

pub use chain::{ChainSnapshot, NodeSnapshot};
pub use error::{PipelineError, PipelineResult, StageError};
pub use events::{CallbackSender, ErrorCallback, StageFailure};
pub use graph::{NodeKind, PipelineGraph, RemoveOutcome};
pub use id::{NodeId, TargetId};
pub use node::{AnyStage, BuiltinStage, FrameAction, Stage, StageContext};
pub use stage_kind::StageKind;
