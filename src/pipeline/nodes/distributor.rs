//! DistributorStage: hands frames to a [`DistributionEngine`].
//!
//! The stage is a sink: it forwards the original frame (so it may still sit
//! mid-chain) and lets the engine fan it out to its render targets.

use crate::distribute::DistributionEngine;
use crate::pipeline::error::StageError;
use crate::pipeline::node::{FrameAction, StageContext};
use crate::types::Frame;

pub struct DistributorStage {
    engine: DistributionEngine,
    dropped: u64,
}

impl DistributorStage {
    pub fn new(engine: DistributionEngine) -> Self {
        Self { engine, dropped: 0 }
    }

    pub fn name(&self) -> &str {
        "Distributor"
    }

    pub fn engine(&self) -> &DistributionEngine {
        &self.engine
    }

    /// Frames the engine refused because it was stopping.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn on_frame(
        &mut self,
        _ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        if !self.engine.request_frame(*frame) {
            self.dropped += 1;
        }
        Ok(FrameAction::Forward)
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        if let Err(e) = self.engine.resize(width, height) {
            tracing::warn!("Engine '{}' resize failed: {}", self.engine.name(), e);
        }
    }

    pub fn on_refresh(&mut self) {
        if let Err(e) = self.engine.refresh() {
            tracing::debug!("Engine '{}' refresh skipped: {}", self.engine.name(), e);
        }
    }

    pub fn on_release(&mut self) {
        self.engine.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::{ContextMode, EngineState};
    use crate::gpu::headless::{HeadlessContext, HeadlessSurface, RecordingDrawerFactory};
    use crate::pipeline::events::CallbackWorker;
    use crate::pipeline::id::{NodeId, TargetId};
    use crate::types::TextureId;
    use std::sync::Arc;

    #[test]
    fn test_forwards_and_distributes() {
        let engine = DistributionEngine::new(
            "stage-test",
            ContextMode::Independent(Arc::new(HeadlessContext::new())),
            Arc::new(RecordingDrawerFactory::new()),
        )
        .unwrap();
        let sink = HeadlessSurface::window(16, 16);
        engine.add_target(TargetId(1), sink.clone(), false, 0.0).unwrap();

        let worker = CallbackWorker::spawn("test-distributor").unwrap();
        let mut ctx = StageContext {
            node: NodeId(0),
            width: 16,
            height: 16,
            callbacks: worker.sender(),
        };
        let mut stage = DistributorStage::new(engine.clone());
        let frame = Frame::new(TextureId(3), 16, 16).unwrap();
        assert_eq!(stage.on_frame(&mut ctx, &frame).unwrap(), FrameAction::Forward);
        engine.sync().unwrap();
        assert_eq!(sink.present_count(), 1);

        engine.release_blocking();
        stage.on_release();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(stage.on_frame(&mut ctx, &frame).unwrap(), FrameAction::Forward);
        assert_eq!(stage.dropped(), 1);
    }
}
