//! Requests queued to a distribution engine's owning thread.

use crate::gpu::RenderSurface;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::TargetId;
use crate::types::{Color, Frame, Matrix4, MirrorMode};
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Completion channel for requests the caller waits on.
pub(crate) type Reply = Sender<PipelineResult<()>>;

/// One unit of work for the owning thread, handled strictly in FIFO order.
pub(crate) enum EngineRequest {
    AddTarget {
        id: TargetId,
        sink: Arc<dyn RenderSurface>,
        recordable: bool,
        max_fps: f32,
        reply: Reply,
    },
    RemoveTarget {
        id: TargetId,
        reply: Reply,
    },
    RemoveAll {
        reply: Reply,
    },
    SetEnabled {
        id: TargetId,
        enabled: bool,
    },
    /// `None` applies to every target.
    SetMirror {
        id: Option<TargetId>,
        mode: MirrorMode,
    },
    SetModelView {
        id: TargetId,
        matrix: Matrix4,
    },
    SetMaxFps {
        id: TargetId,
        max_fps: f32,
    },
    /// `None` clears every target.
    Clear {
        id: Option<TargetId>,
        color: Color,
    },
    Frame(Frame),
    Resize {
        width: u32,
        height: u32,
    },
    /// Drop cached drawer programs.
    Refresh,
    /// Barrier: replies once everything queued before it has been handled.
    Sync {
        reply: Reply,
    },
    Stop {
        reply: Option<Reply>,
    },
}

impl EngineRequest {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            EngineRequest::AddTarget { .. } => "add_target",
            EngineRequest::RemoveTarget { .. } => "remove_target",
            EngineRequest::RemoveAll { .. } => "remove_all",
            EngineRequest::SetEnabled { .. } => "set_enabled",
            EngineRequest::SetMirror { .. } => "set_mirror",
            EngineRequest::SetModelView { .. } => "set_model_view",
            EngineRequest::SetMaxFps { .. } => "set_max_fps",
            EngineRequest::Clear { .. } => "clear",
            EngineRequest::Frame(_) => "frame",
            EngineRequest::Resize { .. } => "resize",
            EngineRequest::Refresh => "refresh",
            EngineRequest::Sync { .. } => "sync",
            EngineRequest::Stop { .. } => "stop",
        }
    }

    /// Reply channel of a blocking request, if any.
    pub(crate) fn into_reply(self) -> Option<Reply> {
        match self {
            EngineRequest::AddTarget { reply, .. }
            | EngineRequest::RemoveTarget { reply, .. }
            | EngineRequest::RemoveAll { reply }
            | EngineRequest::Sync { reply } => Some(reply),
            EngineRequest::Stop { reply } => reply,
            _ => None,
        }
    }
}
