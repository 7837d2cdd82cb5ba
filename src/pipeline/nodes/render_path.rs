//! Pass-through vs. render-then-forward routing shared by drawing stages.
//!
//! A drawing stage may drive a visible sink, render into an off-screen
//! buffer, or both. Which of those happen, and which frame goes downstream,
//! is decided by the stage's [`PipelineMode`] together with whether a sink
//! is currently bound.

use crate::gpu::{check_sink, GpuContext, OffscreenBuffer, RenderSurface};
use crate::pipeline::error::{PipelineResult, StageError};
use crate::pipeline::node::FrameAction;
use crate::types::{Frame, Matrix4};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a drawing stage routes its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Draw to the sink when bound, otherwise render and forward the result.
    #[default]
    Default,
    /// Never render off-screen; always forward the original frame.
    PassThrough,
    /// Always render off-screen and forward the rendered frame.
    Render,
    /// Render off-screen as a side output but forward the original frame.
    Both,
}

impl PipelineMode {
    pub fn all() -> &'static [PipelineMode] {
        &[
            PipelineMode::Default,
            PipelineMode::PassThrough,
            PipelineMode::Render,
            PipelineMode::Both,
        ]
    }

    /// Resolve this mode against whether a sink is bound.
    pub fn route(self, sink_bound: bool) -> RenderRoute {
        match self {
            PipelineMode::Default if sink_bound => RenderRoute {
                draw_to_sink: true,
                render_offscreen: false,
                forward_rendered: false,
            },
            PipelineMode::Default => RenderRoute {
                draw_to_sink: false,
                render_offscreen: true,
                forward_rendered: true,
            },
            PipelineMode::PassThrough => RenderRoute {
                draw_to_sink: sink_bound,
                render_offscreen: false,
                forward_rendered: false,
            },
            PipelineMode::Render => RenderRoute {
                draw_to_sink: sink_bound,
                render_offscreen: true,
                forward_rendered: true,
            },
            PipelineMode::Both => RenderRoute {
                draw_to_sink: sink_bound,
                render_offscreen: true,
                forward_rendered: false,
            },
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineMode::Default => "Default",
            PipelineMode::PassThrough => "Pass-through",
            PipelineMode::Render => "Render",
            PipelineMode::Both => "Both",
        };
        write!(f, "{}", name)
    }
}

/// What a drawing stage does with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRoute {
    pub draw_to_sink: bool,
    pub render_offscreen: bool,
    /// Forward the off-screen result instead of the original frame.
    pub forward_rendered: bool,
}

/// Sink binding, off-screen buffer and routing for one drawing stage.
pub struct RenderPath {
    context: Arc<dyn GpuContext>,
    mode: PipelineMode,
    sink: Option<Arc<dyn RenderSurface>>,
    buffer: Option<OffscreenBuffer>,
    side_output: Option<Frame>,
}

impl RenderPath {
    pub fn new(context: Arc<dyn GpuContext>, mode: PipelineMode) -> Self {
        Self {
            context,
            mode,
            sink: None,
            buffer: None,
            side_output: None,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PipelineMode) {
        self.mode = mode;
    }

    /// Bind a visible sink. Unsupported or dead surfaces are rejected.
    pub fn bind_sink(&mut self, sink: Arc<dyn RenderSurface>) -> PipelineResult<()> {
        check_sink(sink.as_ref())?;
        self.sink = Some(sink);
        Ok(())
    }

    pub fn unbind_sink(&mut self) -> Option<Arc<dyn RenderSurface>> {
        self.sink.take()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn route(&self) -> RenderRoute {
        self.mode.route(self.has_sink())
    }

    /// Off-screen result of the last frame when it was not forwarded.
    pub fn side_output(&self) -> Option<Frame> {
        self.side_output
    }

    /// Route one frame, calling `draw` once per target drawn into.
    ///
    /// The off-screen buffer follows the node size, falling back to the
    /// frame size while the node has none.
    pub fn process<F>(
        &mut self,
        frame: &Frame,
        node_size: (u32, u32),
        mut draw: F,
    ) -> Result<FrameAction, StageError>
    where
        F: FnMut(&Frame, &Matrix4) -> Result<(), StageError>,
    {
        let route = self.route();

        if route.draw_to_sink {
            if let Some(sink) = &self.sink {
                if sink.can_draw() {
                    self.context.make_current(sink.as_ref())?;
                    draw(frame, &Matrix4::IDENTITY)?;
                    sink.present()?;
                }
            }
        }

        let mut rendered = None;
        if route.render_offscreen {
            let (width, height) = match node_size {
                (w, h) if w > 0 && h > 0 => (w, h),
                _ => (frame.width, frame.height),
            };
            let buffer = self.ensure_buffer(width, height)?;
            self.context.bind_offscreen(&buffer)?;
            draw(frame, &Matrix4::IDENTITY)?;
            rendered = Some(frame.rendered(buffer.texture, width, height));
        }

        if route.forward_rendered {
            self.side_output = None;
            Ok(rendered.map_or(FrameAction::Forward, FrameAction::Replace))
        } else {
            self.side_output = rendered;
            Ok(FrameAction::Forward)
        }
    }

    fn ensure_buffer(&mut self, width: u32, height: u32) -> PipelineResult<OffscreenBuffer> {
        match self.buffer {
            Some(buffer) if buffer.matches(width, height) => Ok(buffer),
            _ => {
                self.drop_buffer();
                let buffer = self.context.create_offscreen(width, height)?;
                tracing::trace!("Created {}x{} off-screen buffer {}", width, height, buffer.id);
                self.buffer = Some(buffer);
                Ok(buffer)
            }
        }
    }

    /// Release the off-screen buffer; the next frame recreates it.
    pub fn drop_buffer(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.context.release_offscreen(buffer);
        }
        self.side_output = None;
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        if self.buffer.is_some_and(|b| !b.matches(width, height)) {
            self.drop_buffer();
        }
    }

    /// Drop every GPU resource and the sink.
    pub fn release(&mut self) {
        self.drop_buffer();
        self.sink = None;
    }
}
