//! EffectStage: applies a [`FrameEffect`] to every frame.
//!
//! The effect owns the actual shader math; the stage owns routing (sink vs.
//! off-screen) through a [`RenderPath`], and the effect is asked to draw once
//! per target the route selects.

use crate::gpu::{GpuContext, RenderSurface};
use crate::pipeline::error::{PipelineResult, StageError};
use crate::pipeline::node::{FrameAction, StageContext};
use crate::pipeline::nodes::render_path::{PipelineMode, RenderPath};
use crate::types::{Frame, Matrix4, TextureId};
use std::sync::Arc;

/// Effect math collaborator.
///
/// `apply` draws `frame` into whatever target is currently bound.
#[cfg_attr(test, mockall::automock)]
pub trait FrameEffect: Send {
    fn name(&self) -> &'static str;

    fn apply(&mut self, frame: &Frame, model_view: &Matrix4) -> Result<(), StageError>;

    /// Mask texture to composite, if the effect uses one.
    fn set_mask(&mut self, _mask: Option<TextureId>) {}

    /// Drop compiled programs; called after every topology change.
    fn reset(&mut self) {}
}

pub struct EffectStage {
    effect: Box<dyn FrameEffect>,
    path: RenderPath,
    enabled: bool,
}

impl EffectStage {
    pub fn new(context: Arc<dyn GpuContext>, effect: Box<dyn FrameEffect>) -> Self {
        Self::with_mode(context, effect, PipelineMode::Default)
    }

    pub fn with_mode(
        context: Arc<dyn GpuContext>,
        effect: Box<dyn FrameEffect>,
        mode: PipelineMode,
    ) -> Self {
        Self {
            effect,
            path: RenderPath::new(context, mode),
            enabled: true,
        }
    }

    pub fn name(&self) -> &str {
        "Effect"
    }

    pub fn effect_name(&self) -> &'static str {
        self.effect.name()
    }

    /// Swap the effect; the old one is dropped.
    pub fn set_effect(&mut self, effect: Box<dyn FrameEffect>) {
        tracing::debug!("Effect {} replaced by {}", self.effect.name(), effect.name());
        self.effect = effect;
    }

    pub(crate) fn effect_mut(&mut self) -> &mut dyn FrameEffect {
        self.effect.as_mut()
    }

    /// Disabled effects forward frames untouched.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_mode(&mut self, mode: PipelineMode) {
        self.path.set_mode(mode);
    }

    pub fn mode(&self) -> PipelineMode {
        self.path.mode()
    }

    pub fn bind_sink(&mut self, sink: Arc<dyn RenderSurface>) -> PipelineResult<()> {
        self.path.bind_sink(sink)
    }

    pub fn unbind_sink(&mut self) -> Option<Arc<dyn RenderSurface>> {
        self.path.unbind_sink()
    }

    /// Off-screen result of the last frame in [`PipelineMode::Both`].
    pub fn side_output(&self) -> Option<Frame> {
        self.path.side_output()
    }

    pub fn on_frame(
        &mut self,
        ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        if !self.enabled {
            return Ok(FrameAction::Forward);
        }
        let effect = &mut self.effect;
        self.path
            .process(frame, (ctx.width, ctx.height), |f, mv| effect.apply(f, mv))
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.path.on_resize(width, height);
    }

    pub fn on_refresh(&mut self) {
        self.effect.reset();
        self.path.drop_buffer();
    }

    pub fn on_release(&mut self) {
        self.path.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessContext, HeadlessSurface};
    use crate::pipeline::events::CallbackWorker;
    use crate::pipeline::id::NodeId;

    fn run(stage: &mut EffectStage, frame: &Frame) -> Result<FrameAction, StageError> {
        let worker = CallbackWorker::spawn("test-effect").unwrap();
        let mut ctx = StageContext {
            node: NodeId(0),
            width: 0,
            height: 0,
            callbacks: worker.sender(),
        };
        stage.on_frame(&mut ctx, frame)
    }

    fn frame() -> Frame {
        Frame::new(TextureId(5), 64, 64).unwrap()
    }

    #[test]
    fn test_applies_once_per_target() {
        let mut effect = MockFrameEffect::new();
        effect.expect_apply().times(2).returning(|_, _| Ok(()));

        let mut stage = EffectStage::with_mode(
            Arc::new(HeadlessContext::new()),
            Box::new(effect),
            PipelineMode::Render,
        );
        stage.bind_sink(HeadlessSurface::window(64, 64)).unwrap();

        let action = run(&mut stage, &frame()).unwrap();
        assert!(matches!(action, FrameAction::Replace(_)));
    }

    #[test]
    fn test_disabled_effect_is_not_applied() {
        let mut effect = MockFrameEffect::new();
        effect.expect_apply().never();

        let mut stage = EffectStage::new(Arc::new(HeadlessContext::new()), Box::new(effect));
        stage.set_enabled(false);
        assert_eq!(run(&mut stage, &frame()).unwrap(), FrameAction::Forward);
    }

    #[test]
    fn test_effect_error_surfaces_as_stage_error() {
        let mut effect = MockFrameEffect::new();
        effect.expect_apply().returning(|_, _| {
            Err(StageError::Effect {
                effect: "mock".into(),
                message: "shader compile failed".into(),
            })
        });

        let mut stage = EffectStage::new(Arc::new(HeadlessContext::new()), Box::new(effect));
        assert!(matches!(
            run(&mut stage, &frame()),
            Err(StageError::Effect { .. })
        ));
    }

    #[test]
    fn test_refresh_resets_effect() {
        let mut effect = MockFrameEffect::new();
        effect.expect_reset().times(1).return_const(());

        let mut stage = EffectStage::new(Arc::new(HeadlessContext::new()), Box::new(effect));
        stage.on_refresh();
    }
}
