//! Headless software backend
//!
//! Implements every GPU collaborator trait without touching a real graphics
//! API. Nothing is rendered; instead each object counts what was asked of it
//! so the demo binary and the tests can observe the pipeline's behaviour.
//!
//! - [`HeadlessContext`] - counts binds, clears and off-screen allocations
//! - [`HeadlessSurface`] - counts presents, with a toggleable "can draw" gate
//! - [`RecordingDrawerFactory`] - drawers that log every draw into a shared [`DrawLog`]
//! - [`RecordingEffect`] - a `FrameEffect` that only counts applications
//! - [`SyntheticCapturer`] - a `StillCapturer` producing blank RGBA buffers

use crate::gpu::{
    DrawerFactory, FrameDrawer, GpuContext, OffscreenBuffer, RenderSurface, SurfaceKind,
};
use crate::pipeline::error::{PipelineError, PipelineResult, StageError};
use crate::pipeline::nodes::capture::StillCapturer;
use crate::pipeline::nodes::effect::FrameEffect;
use crate::types::{Color, Frame, Matrix4, TextureId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Counters shared between a context and every context shared from it
#[derive(Debug, Default)]
struct ContextCounters {
    next_texture: AtomicU32,
    next_buffer: AtomicU64,
    binds: AtomicU64,
    clears: AtomicU64,
    offscreen_created: AtomicU64,
    offscreen_live: AtomicI64,
}

/// Software context
#[derive(Debug)]
pub struct HeadlessContext {
    counters: Arc<ContextCounters>,
    valid: AtomicBool,
    advanced: bool,
    current: Mutex<Option<u64>>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(ContextCounters::default()), false)
    }

    /// Context reporting the advanced capability set
    pub fn advanced() -> Self {
        Self::with_counters(Arc::new(ContextCounters::default()), true)
    }

    fn with_counters(counters: Arc<ContextCounters>, advanced: bool) -> Self {
        Self {
            counters,
            valid: AtomicBool::new(true),
            advanced,
            current: Mutex::new(None),
        }
    }

    /// Allocate a fresh texture handle, e.g. for a synthetic camera frame
    pub fn allocate_texture(&self) -> TextureId {
        TextureId(self.counters.next_texture.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Identity of the surface or buffer last bound
    pub fn current_target(&self) -> Option<u64> {
        *self.current.lock()
    }

    pub fn bind_count(&self) -> u64 {
        self.counters.binds.load(Ordering::Relaxed)
    }

    pub fn clear_count(&self) -> u64 {
        self.counters.clears.load(Ordering::Relaxed)
    }

    pub fn offscreen_created(&self) -> u64 {
        self.counters.offscreen_created.load(Ordering::Relaxed)
    }

    /// Off-screen buffers created and not yet released
    pub fn offscreen_live(&self) -> i64 {
        self.counters.offscreen_live.load(Ordering::Relaxed)
    }

    fn check_valid(&self) -> PipelineResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(PipelineError::Gpu("context has been released".into()))
        }
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuContext for HeadlessContext {
    fn make_current(&self, surface: &dyn RenderSurface) -> PipelineResult<()> {
        self.check_valid()?;
        if !surface.is_valid() {
            return Err(PipelineError::Gpu(format!(
                "surface {} is no longer valid",
                surface.identity()
            )));
        }
        self.counters.binds.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(surface.identity());
        Ok(())
    }

    fn create_offscreen(&self, width: u32, height: u32) -> PipelineResult<OffscreenBuffer> {
        self.check_valid()?;
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "off-screen buffer size must be positive, got {}x{}",
                width, height
            )));
        }
        self.counters.offscreen_created.fetch_add(1, Ordering::Relaxed);
        self.counters.offscreen_live.fetch_add(1, Ordering::Relaxed);
        Ok(OffscreenBuffer {
            id: self.counters.next_buffer.fetch_add(1, Ordering::Relaxed) + 1,
            texture: self.allocate_texture(),
            width,
            height,
        })
    }

    fn bind_offscreen(&self, buffer: &OffscreenBuffer) -> PipelineResult<()> {
        self.check_valid()?;
        self.counters.binds.fetch_add(1, Ordering::Relaxed);
        *self.current.lock() = Some(buffer.id);
        Ok(())
    }

    fn release_offscreen(&self, _buffer: OffscreenBuffer) {
        self.counters.offscreen_live.fetch_sub(1, Ordering::Relaxed);
    }

    fn clear(&self, _color: Color) -> PipelineResult<()> {
        self.check_valid()?;
        self.counters.clears.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn create_shared(&self) -> PipelineResult<Arc<dyn GpuContext>> {
        self.check_valid()?;
        Ok(Arc::new(Self::with_counters(
            self.counters.clone(),
            self.advanced,
        )))
    }

    fn release(&self) {
        if self.valid.swap(false, Ordering::SeqCst) {
            tracing::debug!("Headless context released");
        }
        *self.current.lock() = None;
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn is_advanced(&self) -> bool {
        self.advanced
    }
}

/// Software output surface
#[derive(Debug)]
pub struct HeadlessSurface {
    id: u64,
    kind: SurfaceKind,
    width: u32,
    height: u32,
    valid: AtomicBool,
    can_draw: AtomicBool,
    presents: AtomicU64,
}

impl HeadlessSurface {
    pub fn new(kind: SurfaceKind, width: u32, height: u32) -> Self {
        Self {
            id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            width,
            height,
            valid: AtomicBool::new(true),
            can_draw: AtomicBool::new(true),
            presents: AtomicU64::new(0),
        }
    }

    pub fn window(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self::new(SurfaceKind::Window, width, height))
    }

    pub fn encoder(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self::new(SurfaceKind::EncoderInput, width, height))
    }

    pub fn offscreen(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self::new(SurfaceKind::Offscreen, width, height))
    }

    pub fn unsupported() -> Arc<Self> {
        Arc::new(Self::new(SurfaceKind::Unsupported, 1, 1))
    }

    pub fn set_can_draw(&self, can_draw: bool) {
        self.can_draw.store(can_draw, Ordering::SeqCst);
    }

    /// Simulate the platform destroying the surface
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub fn present_count(&self) -> u64 {
        self.presents.load(Ordering::SeqCst)
    }
}

impl RenderSurface for HeadlessSurface {
    fn identity(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn can_draw(&self) -> bool {
        self.can_draw.load(Ordering::SeqCst)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&self) -> PipelineResult<()> {
        if !self.is_valid() {
            return Err(PipelineError::Gpu(format!(
                "present on invalid surface {}",
                self.id
            )));
        }
        self.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared record of everything recording drawers did
#[derive(Debug, Default)]
pub struct DrawLog {
    draws: AtomicU64,
    created: AtomicU64,
    released: AtomicU64,
    resets: AtomicU64,
    last: Mutex<Option<(TextureId, Matrix4)>>,
}

impl DrawLog {
    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Texture and model-view of the most recent draw
    pub fn last_draw(&self) -> Option<(TextureId, Matrix4)> {
        *self.last.lock()
    }
}

/// Drawer that records instead of rendering
pub struct RecordingDrawer {
    log: Arc<DrawLog>,
}

impl FrameDrawer for RecordingDrawer {
    fn draw(&mut self, frame: &Frame, model_view: &Matrix4) -> PipelineResult<()> {
        self.log.draws.fetch_add(1, Ordering::SeqCst);
        *self.log.last.lock() = Some((frame.texture, *model_view));
        Ok(())
    }

    fn reset(&mut self) {
        self.log.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.log.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`RecordingDrawer`]s that share one [`DrawLog`]
#[derive(Default)]
pub struct RecordingDrawerFactory {
    log: Arc<DrawLog>,
}

impl RecordingDrawerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> Arc<DrawLog> {
        self.log.clone()
    }
}

impl DrawerFactory for RecordingDrawerFactory {
    fn create_drawer(&self, _is_external: bool) -> Box<dyn FrameDrawer> {
        self.log.created.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingDrawer {
            log: self.log.clone(),
        })
    }
}

/// Effect that counts applications, optionally failing every one
pub struct RecordingEffect {
    name: &'static str,
    applied: Arc<AtomicU64>,
    fail: bool,
}

impl RecordingEffect {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            applied: Arc::new(AtomicU64::new(0)),
            fail: false,
        }
    }

    /// Effect whose every application fails
    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    /// Counter of successful applications
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.applied.clone()
    }
}

impl FrameEffect for RecordingEffect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&mut self, _frame: &Frame, _model_view: &Matrix4) -> Result<(), StageError> {
        if self.fail {
            return Err(StageError::Effect {
                effect: self.name.to_string(),
                message: "configured to fail".into(),
            });
        }
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Capturer producing zeroed RGBA buffers the size of the frame
#[derive(Debug, Default)]
pub struct SyntheticCapturer;

impl StillCapturer for SyntheticCapturer {
    fn capture(&mut self, frame: &Frame) -> Result<Vec<u8>, StageError> {
        let len = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|px| px.checked_mul(4))
            .ok_or_else(|| StageError::Capture("frame too large to capture".into()))?;
        Ok(vec![0u8; len])
    }
}
