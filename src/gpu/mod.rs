//! GPU collaborator seam
//!
//! The pipeline never talks to a graphics API directly. Everything it needs
//! from the GPU goes through the traits in this module, so a platform
//! backend (EGL, WGL, Metal...) and the [`headless`] software backend are
//! interchangeable.
//!
//! - [`GpuContext`] - a graphics context: binding surfaces, off-screen buffers, clears
//! - [`RenderSurface`] - an output sink a context can be made current on
//! - [`FrameDrawer`] / [`DrawerFactory`] - the injected strategy that draws a frame's texture
//! - [`GpuThread`] - the single thread that holds a context current
//!
//! A context is only ever used from the thread it is current on. Stages run
//! on the thread that delivers frames; a distribution engine either shares
//! that thread or owns a [`GpuThread`] with a context from
//! [`GpuContext::create_shared`].

pub mod headless;
pub mod thread;

pub use thread::{GpuHandle, GpuThread};

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::types::{Color, Frame, Matrix4, TextureId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What kind of output a surface is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// On-screen window or view
    Window,
    /// Input surface of a hardware video encoder
    EncoderInput,
    /// Off-screen surface (pbuffer or texture backed)
    Offscreen,
    /// Anything a context cannot be bound to
    Unsupported,
}

impl SurfaceKind {
    pub fn is_supported(self) -> bool {
        !matches!(self, SurfaceKind::Unsupported)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SurfaceKind::Window => "Window",
            SurfaceKind::EncoderInput => "Encoder Input",
            SurfaceKind::Offscreen => "Offscreen",
            SurfaceKind::Unsupported => "Unsupported",
        }
    }
}

/// Output sink that a context can draw into.
pub trait RenderSurface: Send + Sync {
    /// Stable identity for the lifetime of the surface. Never 0.
    fn identity(&self) -> u64;

    fn kind(&self) -> SurfaceKind;

    /// Whether the underlying platform object is still alive
    fn is_valid(&self) -> bool;

    /// Whether the surface can accept a draw right now
    fn can_draw(&self) -> bool {
        true
    }

    /// Native size in pixels
    fn size(&self) -> (u32, u32);

    /// Swap/submit what was drawn since the last present.
    fn present(&self) -> PipelineResult<()>;
}

/// Reject sinks a context cannot be bound to: unsupported kinds and dead surfaces.
pub fn check_sink(sink: &dyn RenderSurface) -> PipelineResult<()> {
    let kind = sink.kind();
    if !kind.is_supported() {
        return Err(PipelineError::UnsupportedSink(format!(
            "surface {} of kind {}",
            sink.identity(),
            kind.display_name()
        )));
    }
    if !sink.is_valid() {
        return Err(PipelineError::UnsupportedSink(format!(
            "surface {} is no longer valid",
            sink.identity()
        )));
    }
    Ok(())
}

/// GPU-side render buffer owned by a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffscreenBuffer {
    pub id: u64,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

impl OffscreenBuffer {
    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

/// Graphics context
pub trait GpuContext: Send + Sync {
    /// Bind `surface` as the draw target.
    fn make_current(&self, surface: &dyn RenderSurface) -> PipelineResult<()>;

    fn create_offscreen(&self, width: u32, height: u32) -> PipelineResult<OffscreenBuffer>;

    /// Bind an off-screen buffer as the draw target.
    fn bind_offscreen(&self, buffer: &OffscreenBuffer) -> PipelineResult<()>;

    fn release_offscreen(&self, buffer: OffscreenBuffer);

    /// Clear the currently bound target.
    fn clear(&self, color: Color) -> PipelineResult<()>;

    /// New context sharing textures with this one, for use on another thread.
    fn create_shared(&self) -> PipelineResult<Arc<dyn GpuContext>>;

    /// Destroy the context. Idempotent.
    fn release(&self);

    fn is_valid(&self) -> bool;

    /// Context supports the advanced capability set
    fn is_advanced(&self) -> bool;
}

/// Draws one frame's texture into whatever target is currently bound.
pub trait FrameDrawer: Send {
    fn draw(&mut self, frame: &Frame, model_view: &Matrix4) -> PipelineResult<()>;

    /// Drop GPU programs; the next `draw` rebuilds them.
    fn reset(&mut self) {}

    fn release(&mut self) {}
}

/// Injected strategy creating drawers.
///
/// External (stream) textures need a different sampler than regular 2D
/// textures, so a drawer is created per texture flavour.
pub trait DrawerFactory: Send + Sync {
    fn create_drawer(&self, is_external: bool) -> Box<dyn FrameDrawer>;
}

/// Drawer cached against the texture flavour it was created for
pub(crate) struct CachedDrawer {
    is_external: bool,
    drawer: Box<dyn FrameDrawer>,
}

impl CachedDrawer {
    /// Drawer for `is_external`, replacing a cached one of the other flavour.
    pub(crate) fn obtain<'a>(
        slot: &'a mut Option<CachedDrawer>,
        factory: &dyn DrawerFactory,
        is_external: bool,
    ) -> &'a mut dyn FrameDrawer {
        if slot.as_ref().map(|c| c.is_external) != Some(is_external) {
            if let Some(mut old) = slot.take() {
                old.drawer.release();
            }
        }
        let cached = slot.get_or_insert_with(|| CachedDrawer {
            is_external,
            drawer: factory.create_drawer(is_external),
        });
        cached.drawer.as_mut()
    }

    pub(crate) fn release(slot: &mut Option<CachedDrawer>) {
        if let Some(mut cached) = slot.take() {
            cached.drawer.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::headless::RecordingDrawerFactory;
    use super::*;

    #[test]
    fn test_surface_kind_support() {
        assert!(SurfaceKind::Window.is_supported());
        assert!(SurfaceKind::EncoderInput.is_supported());
        assert!(SurfaceKind::Offscreen.is_supported());
        assert!(!SurfaceKind::Unsupported.is_supported());
    }

    #[test]
    fn test_cached_drawer_recreated_on_flavour_change() {
        let factory = RecordingDrawerFactory::new();
        let log = factory.log();
        let mut slot = None;

        CachedDrawer::obtain(&mut slot, &factory, false);
        CachedDrawer::obtain(&mut slot, &factory, false);
        assert_eq!(log.created(), 1);

        CachedDrawer::obtain(&mut slot, &factory, true);
        assert_eq!(log.created(), 2);
        assert_eq!(log.released(), 1);

        CachedDrawer::release(&mut slot);
        assert_eq!(log.released(), 2);
        assert!(slot.is_none());
    }
}
