//! Built-in pipeline stages.

pub mod branch;
pub mod capture;
pub mod distributor;
pub mod effect;
pub mod histogram;
pub mod mask;
pub mod proxy;
pub mod render_path;
pub mod surface;

pub use branch::BranchStage;
pub use capture::{CaptureStage, CapturedStill, StillCallback, StillCapturer, UNLIMITED_CAPTURES};
pub use distributor::DistributorStage;
pub use effect::{EffectStage, FrameEffect};
pub use histogram::HistogramStage;
pub use mask::MaskStage;
pub use proxy::ProxyStage;
pub use render_path::{PipelineMode, RenderPath, RenderRoute};
pub use surface::SurfaceStage;
