//! SurfaceStage: terminal sink drawing every frame into one surface.
//!
//! This is the encoder-input stage: the bound surface is typically the input
//! surface of a hardware encoder, but any supported [`RenderSurface`] works.
//! Frames are still forwarded so the stage can sit in the middle of a chain.

use crate::distribute::throttle::{validate_max_fps, FrameThrottle};
use crate::gpu::{check_sink, CachedDrawer, DrawerFactory, GpuContext, RenderSurface};
use crate::pipeline::error::{PipelineResult, StageError};
use crate::pipeline::node::{FrameAction, StageContext};
use crate::types::{Frame, Matrix4, MirrorMode};
use std::sync::Arc;
use std::time::Instant;

pub struct SurfaceStage {
    context: Arc<dyn GpuContext>,
    factory: Arc<dyn DrawerFactory>,
    drawer: Option<CachedDrawer>,
    sink: Option<Arc<dyn RenderSurface>>,
    throttle: FrameThrottle,
    mirror: MirrorMode,
    frames_drawn: u64,
}

impl SurfaceStage {
    pub fn new(context: Arc<dyn GpuContext>, factory: Arc<dyn DrawerFactory>) -> Self {
        Self {
            context,
            factory,
            drawer: None,
            sink: None,
            throttle: FrameThrottle::default(),
            mirror: MirrorMode::Normal,
            frames_drawn: 0,
        }
    }

    pub fn name(&self) -> &str {
        "Surface"
    }

    pub fn set_sink(&mut self, sink: Arc<dyn RenderSurface>) -> PipelineResult<()> {
        check_sink(sink.as_ref())?;
        tracing::debug!(
            "Surface stage bound to {} surface {}",
            sink.kind().display_name(),
            sink.identity()
        );
        self.sink = Some(sink);
        Ok(())
    }

    pub fn clear_sink(&mut self) -> Option<Arc<dyn RenderSurface>> {
        self.sink.take()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// 0 means unlimited.
    pub fn set_max_fps(&mut self, max_fps: f32) -> PipelineResult<()> {
        self.throttle.set_max_fps(validate_max_fps(max_fps)?);
        Ok(())
    }

    pub fn set_mirror(&mut self, mirror: MirrorMode) {
        self.mirror = mirror;
    }

    pub fn mirror(&self) -> MirrorMode {
        self.mirror
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    pub fn on_frame(
        &mut self,
        _ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        let Some(sink) = &self.sink else {
            return Ok(FrameAction::Forward);
        };
        if !sink.is_valid() {
            return Err(StageError::Sink(format!(
                "surface {} is no longer valid",
                sink.identity()
            )));
        }

        let now = Instant::now();
        if !sink.can_draw() || !self.throttle.should_draw(now) {
            return Ok(FrameAction::Forward);
        }

        self.context.make_current(sink.as_ref())?;
        let model_view = self.mirror.apply(&Matrix4::IDENTITY);
        CachedDrawer::obtain(&mut self.drawer, self.factory.as_ref(), frame.is_external)
            .draw(frame, &model_view)?;
        sink.present()?;

        self.throttle.mark_drawn(now);
        self.frames_drawn += 1;
        Ok(FrameAction::Forward)
    }

    pub fn on_refresh(&mut self) {
        CachedDrawer::release(&mut self.drawer);
    }

    pub fn on_release(&mut self) {
        CachedDrawer::release(&mut self.drawer);
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessContext, HeadlessSurface, RecordingDrawerFactory};
    use crate::pipeline::events::CallbackWorker;
    use crate::pipeline::id::NodeId;
    use crate::types::TextureId;

    fn stage() -> (SurfaceStage, Arc<crate::gpu::headless::DrawLog>) {
        let factory = RecordingDrawerFactory::new();
        let log = factory.log();
        (
            SurfaceStage::new(Arc::new(HeadlessContext::new()), Arc::new(factory)),
            log,
        )
    }

    fn run(stage: &mut SurfaceStage, frames: usize) -> Result<(), StageError> {
        let worker = CallbackWorker::spawn("test-surface").unwrap();
        let mut ctx = StageContext {
            node: NodeId(0),
            width: 32,
            height: 32,
            callbacks: worker.sender(),
        };
        let frame = Frame::new(TextureId(2), 32, 32).unwrap();
        for _ in 0..frames {
            assert_eq!(stage.on_frame(&mut ctx, &frame)?, FrameAction::Forward);
        }
        Ok(())
    }

    #[test]
    fn test_without_sink_forwards() {
        let (mut stage, log) = stage();
        run(&mut stage, 3).unwrap();
        assert_eq!(log.draws(), 0);
        assert_eq!(stage.frames_drawn(), 0);
    }

    #[test]
    fn test_draws_and_presents() {
        let (mut stage, log) = stage();
        let sink = HeadlessSurface::encoder(32, 32);
        stage.set_sink(sink.clone()).unwrap();
        stage.set_mirror(MirrorMode::Vertical);
        run(&mut stage, 3).unwrap();

        assert_eq!(sink.present_count(), 3);
        assert_eq!(log.created(), 1);
        let (texture, model_view) = log.last_draw().unwrap();
        assert_eq!(texture, TextureId(2));
        assert_eq!(model_view.get(1, 1), -1.0);
    }

    #[test]
    fn test_throttled() {
        let (mut stage, _) = stage();
        let sink = HeadlessSurface::window(32, 32);
        stage.set_sink(sink.clone()).unwrap();
        stage.set_max_fps(1.0).unwrap();
        run(&mut stage, 5).unwrap();
        assert_eq!(sink.present_count(), 1);
        assert!(stage.set_max_fps(f32::NAN).is_err());
    }

    #[test]
    fn test_dead_sink_reports_error() {
        let (mut stage, _) = stage();
        let sink = HeadlessSurface::window(32, 32);
        stage.set_sink(sink.clone()).unwrap();
        sink.invalidate();
        assert!(matches!(run(&mut stage, 1), Err(StageError::Sink(_))));
    }

    #[test]
    fn test_release_drops_drawer_and_sink() {
        let (mut stage, log) = stage();
        stage.set_sink(HeadlessSurface::window(32, 32)).unwrap();
        run(&mut stage, 1).unwrap();
        stage.on_release();
        assert_eq!(log.released(), 1);
        assert!(!stage.has_sink());
    }
}
