//! Render target: one output sink inside a distribution engine.
//!
//! Targets are owned by their engine and only ever touched on the engine's
//! owning thread. Everything other threads may look at is published as a
//! [`TargetInfo`] snapshot.

use crate::distribute::throttle::{validate_max_fps, FrameThrottle};
use crate::gpu::{
    check_sink, CachedDrawer, DrawerFactory, GpuContext, OffscreenBuffer, RenderSurface,
    SurfaceKind,
};
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::TargetId;
use crate::types::{Color, Frame, Matrix4, MirrorMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// What happened to one target for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    Disabled,
    /// Skipped by the max-fps limit.
    Throttled,
    /// Sink could not accept a draw right now.
    NotReady,
}

/// Last-known state of a target, readable from any thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: TargetId,
    /// Identity of the bound surface.
    pub sink_id: u64,
    pub kind: SurfaceKind,
    pub enabled: bool,
    pub mirror: MirrorMode,
    pub max_fps: f32,
    pub recordable: bool,
    pub model_view: Matrix4,
    pub draws: u64,
    pub throttled: u64,
}

pub struct RenderTarget {
    id: TargetId,
    sink: Arc<dyn RenderSurface>,
    sink_id: u64,
    enabled: bool,
    mirror: MirrorMode,
    model_view: Matrix4,
    recordable: bool,
    throttle: FrameThrottle,
    drawer: Option<CachedDrawer>,
    blit: Option<CachedDrawer>,
    scratch: Option<OffscreenBuffer>,
    draws: u64,
    throttled: u64,
}

impl RenderTarget {
    pub fn new(
        id: TargetId,
        sink: Arc<dyn RenderSurface>,
        recordable: bool,
        max_fps: f32,
    ) -> PipelineResult<Self> {
        check_sink(sink.as_ref())?;
        let max_fps = validate_max_fps(max_fps)?;
        // Encoder inputs always need a recordable config
        let recordable = recordable || sink.kind() == SurfaceKind::EncoderInput;
        Ok(Self {
            id,
            sink_id: sink.identity(),
            sink,
            enabled: true,
            mirror: MirrorMode::Normal,
            model_view: Matrix4::IDENTITY,
            recordable,
            throttle: FrameThrottle::new(max_fps),
            drawer: None,
            blit: None,
            scratch: None,
            draws: 0,
            throttled: 0,
        })
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn sink_id(&self) -> u64 {
        self.sink_id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn mirror(&self) -> MirrorMode {
        self.mirror
    }

    pub fn set_mirror(&mut self, mirror: MirrorMode) {
        self.mirror = mirror;
    }

    pub fn set_model_view(&mut self, model_view: Matrix4) {
        self.model_view = model_view;
    }

    pub fn set_max_fps(&mut self, max_fps: f32) {
        self.throttle.set_max_fps(max_fps);
    }

    pub fn last_draw(&self) -> Option<Instant> {
        self.throttle.last_draw()
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo {
            id: self.id,
            sink_id: self.sink_id,
            kind: self.sink.kind(),
            enabled: self.enabled,
            mirror: self.mirror,
            max_fps: self.throttle.max_fps(),
            recordable: self.recordable,
            model_view: self.model_view,
            draws: self.draws,
            throttled: self.throttled,
        }
    }

    pub(crate) fn counters(&self) -> (u64, u64) {
        (self.draws, self.throttled)
    }

    /// Draw `frame` into the sink, honouring enable, throttle and mirror.
    ///
    /// Off-screen sinks are drawn through a scratch buffer of `frame_size`
    /// (or the frame's own size while the engine has none), recreated when
    /// that size changes.
    pub fn draw(
        &mut self,
        ctx: &dyn GpuContext,
        factory: &dyn DrawerFactory,
        frame: &Frame,
        frame_size: (u32, u32),
        now: Instant,
    ) -> PipelineResult<DrawOutcome> {
        if !self.enabled {
            return Ok(DrawOutcome::Disabled);
        }
        if !self.throttle.should_draw(now) {
            self.throttled += 1;
            return Ok(DrawOutcome::Throttled);
        }
        if !self.sink.is_valid() || !self.sink.can_draw() {
            return Ok(DrawOutcome::NotReady);
        }

        let model_view = self.mirror.apply(&self.model_view);

        if self.sink.kind() == SurfaceKind::Offscreen {
            let (width, height) = match frame_size {
                (w, h) if w > 0 && h > 0 => (w, h),
                _ => (frame.width, frame.height),
            };
            let scratch = self.ensure_scratch(ctx, width, height)?;
            ctx.bind_offscreen(&scratch)?;
            CachedDrawer::obtain(&mut self.drawer, factory, frame.is_external)
                .draw(frame, &model_view)?;

            let staged = frame.rendered(scratch.texture, width, height);
            ctx.make_current(self.sink.as_ref())?;
            CachedDrawer::obtain(&mut self.blit, factory, false).draw(&staged, &Matrix4::IDENTITY)?;
        } else {
            ctx.make_current(self.sink.as_ref())?;
            CachedDrawer::obtain(&mut self.drawer, factory, frame.is_external)
                .draw(frame, &model_view)?;
        }

        self.sink.present()?;
        self.throttle.mark_drawn(now);
        self.draws += 1;
        Ok(DrawOutcome::Drawn)
    }

    fn ensure_scratch(
        &mut self,
        ctx: &dyn GpuContext,
        width: u32,
        height: u32,
    ) -> PipelineResult<OffscreenBuffer> {
        match self.scratch {
            Some(buffer) if buffer.matches(width, height) => Ok(buffer),
            _ => {
                if let Some(old) = self.scratch.take() {
                    ctx.release_offscreen(old);
                }
                let buffer = ctx.create_offscreen(width, height)?;
                tracing::debug!(
                    "Target {} scratch buffer now {}x{}",
                    self.id,
                    width,
                    height
                );
                self.scratch = Some(buffer);
                Ok(buffer)
            }
        }
    }

    pub fn clear(&mut self, ctx: &dyn GpuContext, color: Color) -> PipelineResult<()> {
        if !self.sink.is_valid() {
            return Ok(());
        }
        ctx.make_current(self.sink.as_ref())?;
        ctx.clear(color)?;
        self.sink.present()
    }

    /// Drop drawer programs; rebuilt on the next draw.
    pub fn reset_drawers(&mut self) {
        CachedDrawer::release(&mut self.drawer);
        CachedDrawer::release(&mut self.blit);
    }

    pub fn release(&mut self, ctx: &dyn GpuContext) {
        self.reset_drawers();
        if let Some(scratch) = self.scratch.take() {
            ctx.release_offscreen(scratch);
        }
    }
}
