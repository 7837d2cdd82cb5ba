//! MaskStage: composites a mask texture over frames.
//!
//! Forwards frames untouched while no mask is set. The compositing itself is
//! the effect's business; the stage hands it the mask and routes the output.

use crate::gpu::{GpuContext, RenderSurface};
use crate::pipeline::error::{PipelineResult, StageError};
use crate::pipeline::node::{FrameAction, StageContext};
use crate::pipeline::nodes::effect::{EffectStage, FrameEffect};
use crate::pipeline::nodes::render_path::PipelineMode;
use crate::types::{Frame, TextureId};
use std::sync::Arc;

pub struct MaskStage {
    inner: EffectStage,
    mask: Option<TextureId>,
}

impl MaskStage {
    pub fn new(context: Arc<dyn GpuContext>, effect: Box<dyn FrameEffect>) -> Self {
        Self {
            inner: EffectStage::new(context, effect),
            mask: None,
        }
    }

    pub fn name(&self) -> &str {
        "Mask"
    }

    pub fn set_mask(&mut self, mask: Option<TextureId>) {
        self.mask = mask;
        self.inner.effect_mut().set_mask(mask);
    }

    pub fn mask(&self) -> Option<TextureId> {
        self.mask
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
        if self.mask.is_none() {
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
        self.mask = None;
        self.inner.on_release();
    }
}
