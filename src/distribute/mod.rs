//! Frame distribution
//!
//! A [`DistributionEngine`] takes frames from a pipeline and draws each into
//! any number of [`RenderTarget`]s (windows, encoder inputs, off-screen
//! buffers), each with its own enable flag, mirror, model-view and frame
//! rate limit.

pub mod engine;
mod request;
pub mod target;
pub mod throttle;

pub use engine::{ContextMode, DistributionEngine, EngineState, EngineStats};
pub use target::{DrawOutcome, RenderTarget, TargetInfo};
pub use throttle::FrameThrottle;
