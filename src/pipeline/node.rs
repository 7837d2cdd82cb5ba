//! Stage abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`Stage` trait**: for user-supplied stages.
//! - **`BuiltinStage` enum**: for all built-in stages. The compiler can
//!   inline match arms, eliminating dynamic dispatch on the frame path.
//!
//! `AnyStage` wraps either variant so the graph can handle both uniformly.
//! Topology (upstream/downstream links, size, released flag) lives in the
//! graph, not in the stage; a stage only sees frames and lifecycle hooks.

use crate::pipeline::error::StageError;
use crate::pipeline::events::CallbackSender;
use crate::pipeline::id::NodeId;
use crate::pipeline::nodes::{
    BranchStage, CaptureStage, DistributorStage, EffectStage, HistogramStage, MaskStage,
    ProxyStage, SurfaceStage,
};
use crate::pipeline::stage_kind::StageKind;
use crate::types::Frame;

/// Context passed to a stage with every frame.
pub struct StageContext<'a> {
    /// Node the stage is mounted on.
    pub node: NodeId,
    /// Current node size (propagated from upstream or set by `resize`).
    pub width: u32,
    pub height: u32,
    /// Worker thread for asynchronous callbacks (captured stills etc.).
    pub callbacks: &'a CallbackSender,
}

/// What a stage wants forwarded downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameAction {
    /// Forward the frame the stage received.
    Forward,
    /// Forward a different frame (typically rendered off-screen).
    Replace(Frame),
    /// Forward nothing.
    Swallow,
}

/// Trait for user-supplied stages.
pub trait Stage: Send {
    /// Human-readable name of this stage.
    fn name(&self) -> &str;

    /// Called for every frame delivered to the node.
    fn on_frame(&mut self, ctx: &mut StageContext, frame: &Frame)
        -> Result<FrameAction, StageError>;

    /// Called when the node size changes.
    fn on_resize(&mut self, _width: u32, _height: u32) {}

    /// Called after a topology change; drop cached GPU resources.
    fn on_refresh(&mut self) {}

    /// Called once when the node is released.
    fn on_release(&mut self) {}
}

/// Enum dispatch for built-in stages.
pub enum BuiltinStage {
    Proxy(ProxyStage),
    Branch(BranchStage),
    Capture(CaptureStage),
    Effect(EffectStage),
    Mask(MaskStage),
    Histogram(HistogramStage),
    Surface(SurfaceStage),
    Distributor(DistributorStage),
}

impl BuiltinStage {
    pub fn kind(&self) -> StageKind {
        match self {
            BuiltinStage::Proxy(_) => StageKind::Proxy,
            BuiltinStage::Branch(_) => StageKind::Branch,
            BuiltinStage::Capture(_) => StageKind::Capture,
            BuiltinStage::Effect(_) => StageKind::Effect,
            BuiltinStage::Mask(_) => StageKind::Mask,
            BuiltinStage::Histogram(_) => StageKind::Histogram,
            BuiltinStage::Surface(_) => StageKind::Surface,
            BuiltinStage::Distributor(_) => StageKind::Distributor,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BuiltinStage::Proxy(s) => s.name(),
            BuiltinStage::Branch(s) => s.name(),
            BuiltinStage::Capture(s) => s.name(),
            BuiltinStage::Effect(s) => s.name(),
            BuiltinStage::Mask(s) => s.name(),
            BuiltinStage::Histogram(s) => s.name(),
            BuiltinStage::Surface(s) => s.name(),
            BuiltinStage::Distributor(s) => s.name(),
        }
    }

    pub fn on_frame(
        &mut self,
        ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        match self {
            BuiltinStage::Proxy(s) => s.on_frame(ctx, frame),
            BuiltinStage::Branch(s) => s.on_frame(ctx, frame),
            BuiltinStage::Capture(s) => s.on_frame(ctx, frame),
            BuiltinStage::Effect(s) => s.on_frame(ctx, frame),
            BuiltinStage::Mask(s) => s.on_frame(ctx, frame),
            BuiltinStage::Histogram(s) => s.on_frame(ctx, frame),
            BuiltinStage::Surface(s) => s.on_frame(ctx, frame),
            BuiltinStage::Distributor(s) => s.on_frame(ctx, frame),
        }
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        match self {
            BuiltinStage::Proxy(_) | BuiltinStage::Branch(_) | BuiltinStage::Capture(_) => {}
            BuiltinStage::Effect(s) => s.on_resize(width, height),
            BuiltinStage::Mask(s) => s.on_resize(width, height),
            BuiltinStage::Histogram(s) => s.on_resize(width, height),
            BuiltinStage::Surface(_) => {}
            BuiltinStage::Distributor(s) => s.on_resize(width, height),
        }
    }

    pub fn on_refresh(&mut self) {
        match self {
            BuiltinStage::Proxy(_) | BuiltinStage::Branch(_) | BuiltinStage::Capture(_) => {}
            BuiltinStage::Effect(s) => s.on_refresh(),
            BuiltinStage::Mask(s) => s.on_refresh(),
            BuiltinStage::Histogram(s) => s.on_refresh(),
            BuiltinStage::Surface(s) => s.on_refresh(),
            BuiltinStage::Distributor(s) => s.on_refresh(),
        }
    }

    pub fn on_release(&mut self) {
        match self {
            BuiltinStage::Proxy(_) | BuiltinStage::Branch(_) => {}
            BuiltinStage::Capture(s) => s.on_release(),
            BuiltinStage::Effect(s) => s.on_release(),
            BuiltinStage::Mask(s) => s.on_release(),
            BuiltinStage::Histogram(s) => s.on_release(),
            BuiltinStage::Surface(s) => s.on_release(),
            BuiltinStage::Distributor(s) => s.on_release(),
        }
    }
}

/// Wrapper that holds either a built-in stage (enum dispatch) or a custom one (trait object).
pub enum AnyStage {
    Builtin(BuiltinStage),
    Custom(Box<dyn Stage>),
}

impl AnyStage {
    pub fn custom(stage: impl Stage + 'static) -> Self {
        AnyStage::Custom(Box::new(stage))
    }

    pub fn kind(&self) -> StageKind {
        match self {
            AnyStage::Builtin(s) => s.kind(),
            AnyStage::Custom(_) => StageKind::Custom,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AnyStage::Builtin(s) => s.name(),
            AnyStage::Custom(s) => s.name(),
        }
    }

    pub fn on_frame(
        &mut self,
        ctx: &mut StageContext,
        frame: &Frame,
    ) -> Result<FrameAction, StageError> {
        match self {
            AnyStage::Builtin(s) => s.on_frame(ctx, frame),
            AnyStage::Custom(s) => s.on_frame(ctx, frame),
        }
    }

    pub fn on_resize(&mut self, width: u32, height: u32) {
        match self {
            AnyStage::Builtin(s) => s.on_resize(width, height),
            AnyStage::Custom(s) => s.on_resize(width, height),
        }
    }

    pub fn on_refresh(&mut self) {
        match self {
            AnyStage::Builtin(s) => s.on_refresh(),
            AnyStage::Custom(s) => s.on_refresh(),
        }
    }

    pub fn on_release(&mut self) {
        match self {
            AnyStage::Builtin(s) => s.on_release(),
            AnyStage::Custom(s) => s.on_release(),
        }
    }

    pub fn as_capture_mut(&mut self) -> Option<&mut CaptureStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Capture(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_effect_mut(&mut self) -> Option<&mut EffectStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Effect(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_mask_mut(&mut self) -> Option<&mut MaskStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Mask(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_histogram_mut(&mut self) -> Option<&mut HistogramStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Histogram(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_surface_mut(&mut self) -> Option<&mut SurfaceStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Surface(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_distributor(&self) -> Option<&DistributorStage> {
        match self {
            AnyStage::Builtin(BuiltinStage::Distributor(s)) => Some(s),
            _ => None,
        }
    }
}

macro_rules! impl_from_builtin {
    ($($stage:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$stage> for AnyStage {
                fn from(stage: $stage) -> Self {
                    AnyStage::Builtin(BuiltinStage::$variant(stage))
                }
            }
        )*
    };
}

impl_from_builtin! {
    ProxyStage => Proxy,
    BranchStage => Branch,
    CaptureStage => Capture,
    EffectStage => Effect,
    MaskStage => Mask,
    HistogramStage => Histogram,
    SurfaceStage => Surface,
    DistributorStage => Distributor,
}
