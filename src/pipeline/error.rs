//! Pipeline-specific error types.

use crate::pipeline::id::{NodeId, TargetId};
use thiserror::Error;

/// Errors raised synchronously by control-plane calls on the graph and the
/// distribution engine. Never produced by frame delivery.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Node {0} has been released")]
    Released(NodeId),

    #[error("Node {0} not found")]
    NotFound(NodeId),

    #[error("Render target {0} not found")]
    TargetNotFound(TargetId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported sink: {0}")]
    UnsupportedSink(String),

    #[error("Linking {parent} -> {child} would create a cycle")]
    CycleDetected { parent: NodeId, child: NodeId },

    #[error("Distribution engine is stopped")]
    EngineStopped,

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Channel receive error")]
    ChannelRecv,
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Failure of one stage while handling one frame.
///
/// Caught at the stage boundary and reported through the node's error
/// callback; the frame itself keeps flowing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Effect '{effect}' failed: {message}")]
    Effect { effect: String, message: String },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Encoder sink error: {0}")]
    Sink(String),

    #[error("{0}")]
    Other(String),
}

impl From<PipelineError> for StageError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Gpu(message) => StageError::Gpu(message),
            other => StageError::Other(other.to_string()),
        }
    }
}
