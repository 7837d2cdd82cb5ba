//! Option structs making up a [`TexflowConfig`](super::TexflowConfig)
//!
//! # Main Types
//!
//! - [`PipelineOptions`] - capture cadence, frame rate limit, mirror and routing mode
//! - [`EngineConfig`] - how the distribution engine runs
//! - [`TargetConfig`] - one render target to install on the engine
//! - [`LoggingConfig`] - tracing filter and optional log directory
//!
//! Every field has a default, so a config file only needs the keys it changes.

use crate::distribute::DistributionEngine;
use crate::gpu::RenderSurface;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::id::TargetId;
use crate::pipeline::nodes::{CaptureStage, PipelineMode};
use crate::types::MirrorMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Default frame rate limit (0 = unlimited)
pub const DEFAULT_MAX_FPS: f32 = 0.0;

/// Default spacing between captured stills in milliseconds
pub const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 1000;

/// Default tracing filter
pub const DEFAULT_LOG_FILTER: &str = "info,texflow=debug";

/// Per-chain pipeline options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Stills to capture: -1 unlimited, 0 disabled, N a fixed count
    pub num_captures: i32,

    /// Minimum spacing between stills
    pub interval_ms: u64,

    /// Frame rate limit for sinks (0 = unlimited)
    pub max_fps: f32,

    /// Mirror applied to every target
    pub mirror_mode: MirrorMode,

    /// Routing mode of drawing stages
    pub pipeline_mode: PipelineMode,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            num_captures: 0,
            interval_ms: DEFAULT_CAPTURE_INTERVAL_MS,
            max_fps: DEFAULT_MAX_FPS,
            mirror_mode: MirrorMode::Normal,
            pipeline_mode: PipelineMode::Default,
        }
    }
}

impl PipelineOptions {
    /// Arm `stage` with these capture settings
    pub fn arm_capture(&self, stage: &mut CaptureStage) -> PipelineResult<()> {
        stage.request_capture(self.num_captures, self.interval_ms)
    }
}

/// Distribution engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name, used for its thread and in logs
    pub name: String,

    /// Run on an own thread with a shared context instead of the upstream's
    pub independent_context: bool,

    /// Initial frame size
    pub width: u32,
    pub height: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "distributor".to_string(),
            independent_context: true,
            width: 1280,
            height: 720,
        }
    }
}

/// One render target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub id: u32,

    /// Frame rate limit (0 = unlimited); overrides the pipeline default when set
    pub max_fps: Option<f32>,

    /// Mirror for this target; falls back to the pipeline mirror
    pub mirror: Option<MirrorMode>,

    pub enabled: bool,

    /// Whether the sink feeds an encoder
    pub recordable: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: 0,
            max_fps: None,
            mirror: None,
            enabled: true,
            recordable: false,
        }
    }
}

impl TargetConfig {
    pub fn target_id(&self) -> TargetId {
        TargetId(self.id)
    }

    /// Add this target to `engine`, drawing into `sink`.
    pub fn install(
        &self,
        engine: &DistributionEngine,
        sink: Arc<dyn RenderSurface>,
        options: &PipelineOptions,
    ) -> PipelineResult<()> {
        let id = self.target_id();
        engine.add_target(
            id,
            sink,
            self.recordable,
            self.max_fps.unwrap_or(options.max_fps),
        )?;
        engine.set_mirror(id, self.mirror.unwrap_or(options.mirror_mode))?;
        if !self.enabled {
            engine.set_enabled(id, false)?;
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,

    /// Write a daily-rolling log file here as well as to stderr
    pub directory: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
            file_prefix: "texflow.log".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribute::ContextMode;
    use crate::gpu::headless::{HeadlessContext, HeadlessSurface, RecordingDrawerFactory};
    use crate::gpu::headless::SyntheticCapturer;

    #[test]
    fn test_defaults() {
        let options = PipelineOptions::default();
        assert_eq!(options.num_captures, 0);
        assert_eq!(options.max_fps, 0.0);
        assert_eq!(options.pipeline_mode, PipelineMode::Default);
        assert!(TargetConfig::default().enabled);
    }

    #[test]
    fn test_arm_capture() {
        let mut stage = CaptureStage::new(Box::new(SyntheticCapturer));
        let options = PipelineOptions {
            num_captures: 3,
            ..Default::default()
        };
        options.arm_capture(&mut stage).unwrap();
        assert_eq!(stage.remaining(), 3);
    }

    #[test]
    fn test_install_target_falls_back_to_options() {
        let engine = DistributionEngine::new(
            "config-test",
            ContextMode::Independent(Arc::new(HeadlessContext::new())),
            Arc::new(RecordingDrawerFactory::new()),
        )
        .unwrap();
        let options = PipelineOptions {
            max_fps: 24.0,
            mirror_mode: MirrorMode::Horizontal,
            ..Default::default()
        };
        let target = TargetConfig {
            id: 9,
            enabled: false,
            ..Default::default()
        };
        target
            .install(&engine, HeadlessSurface::window(8, 8), &options)
            .unwrap();
        engine.sync().unwrap();

        let info = engine.target_info(TargetId(9)).unwrap();
        assert_eq!(info.max_fps, 24.0);
        assert_eq!(info.mirror, MirrorMode::Horizontal);
        assert!(!info.enabled);
        engine.release_blocking();
    }
}
