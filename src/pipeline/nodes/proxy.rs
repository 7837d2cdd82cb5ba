//! ProxyStage: forwards every frame unchanged.
//!
//! Useful as a stable splice point: other stages can be inserted after it
//! and removed again without touching the producer.

use crate::pipeline::error::StageError;
use crate::pipeline::node::{FrameAction, StageContext};
use crate::types::Frame;

#[derive(Debug, Default)]
pub struct ProxyStage {
    frames: u64,
}

impl ProxyStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        "Proxy"
    }

    /// Frames seen so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn on_frame(
        &mut self,
        _ctx: &mut StageContext,
        _frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        self.frames += 1;
        Ok(FrameAction::Forward)
    }
}
