//! BranchStage: fans frames out to a set of downstream nodes.
//!
//! The fan-out itself is done by the graph, which gives nodes holding this
//! stage a `NodeKind::Branch` child set. The stage only forwards.

use crate::pipeline::error::StageError;
use crate::pipeline::node::{FrameAction, StageContext};
use crate::types::Frame;

#[derive(Debug, Default)]
pub struct BranchStage {
    frames: u64,
}

impl BranchStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        "Branch"
    }

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
