//! HistogramStage: draws a histogram overlay computed by its effect.
//!
//! Hidden histograms forward frames untouched, so the overlay can be
//! toggled without relinking the chain.

use crate::gpu::{GpuContext, RenderSurface};
use crate::pipeline::error::{PipelineResult, StageError};
use crate::pipeline::node::{FrameAction, StageContext};
use crate::pipeline::nodes::effect::{EffectStage, FrameEffect};
use crate::pipeline::nodes::render_path::PipelineMode;
use crate::types::Frame;
use std::sync::Arc;

pub struct HistogramStage {
    inner: EffectStage,
    visible: bool,
}

impl HistogramStage {
    pub fn new(context: Arc<dyn GpuContext>, effect: Box<dyn FrameEffect>) -> Self {
        Self {
            inner: EffectStage::new(context, effect),
            visible: true,
        }
    }

    pub fn name(&self) -> &str {
        "Histogram"
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_mode(&mut self, mode: PipelineMode) {
        self.inner.set_mode(mode);
    }

    pub fn bind_sink(&mut self, sink: Arc<dyn RenderSurface>) -> PipelineResult<()> {
        self.inner.bind_sink(sink)
    }

    pub fn unbind_sink(&mut self) -> Option<Arc<dyn RenderSurface>> {
        self.inner.unbind_sink()
    }

    pub fn on_frame(
        &mut self,
        ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        if !self.visible {
            return Ok(FrameAction::Forward);
        }
        self.inner.on_frame(ctx, frame)
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.inner.on_resize(width, height);
    }

    pub fn on_refresh(&mut self) {
        self.inner.on_refresh();
    }

    pub fn on_release(&mut self) {
        self.inner.on_release();
    }
}
