//! Configuration module for texflow
//!
//! A [`TexflowConfig`] describes one pipeline run: engine setup, pipeline
//! options, the render targets to install and logging. It is read from a
//! `.toml` or `.json` file (chosen by extension) and can be written back in
//! either format.
//!
//! # App Data Location
//!
//! The default config lives in the platform-appropriate data directory:
//! - **Linux**: `~/.local/share/dev.hxyulin.texflow/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.texflow/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.texflow\`
//!
//! # Example
//!
//! ```ignore
//! use texflow::config::TexflowConfig;
//!
//! let config = TexflowConfig::load("texflow.toml")?;
//! config.validate()?;
//! config.save("texflow.json")?;
//! ```

pub mod options;

pub use options::*;

use crate::error::{Result, TexflowError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.texflow";

/// Default config filename
pub const CONFIG_FILE: &str = "texflow.toml";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        TexflowError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            TexflowError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Config File ====================

/// On-disk format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(ConfigFormat::Toml),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(ConfigFormat::Json),
            _ => Err(TexflowError::Config(format!(
                "Unsupported config format {:?}; expected .toml or .json",
                path
            ))),
        }
    }
}

/// Complete configuration of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TexflowConfig {
    pub engine: EngineConfig,
    pub options: PipelineOptions,
    pub targets: Vec<TargetConfig>,
    pub logging: LoggingConfig,
}

impl TexflowConfig {
    /// Load a config file, TOML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            TexflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::parse(&content, format).map_err(|e| e.with_context(format!("{:?}", path)))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config, TOML or JSON by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TexflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        };

        std::fs::write(path, content).map_err(|e| {
            TexflowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Check values serde cannot: ranges, sizes and unique target ids
    pub fn validate(&self) -> Result<()> {
        let options = &self.options;
        check_fps("options.max_fps", options.max_fps)?;
        if options.num_captures < -1 {
            return Err(TexflowError::Config(format!(
                "options.num_captures must be -1, 0 or positive, got {}",
                options.num_captures
            )));
        }
        if self.engine.width == 0 || self.engine.height == 0 {
            return Err(TexflowError::Config(format!(
                "engine size must be non-zero, got {}x{}",
                self.engine.width, self.engine.height
            )));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id) {
                return Err(TexflowError::Config(format!(
                    "duplicate target id {}",
                    target.id
                )));
            }
            if let Some(fps) = target.max_fps {
                check_fps(&format!("targets[{}].max_fps", target.id), fps)?;
            }
        }
        Ok(())
    }
}

fn check_fps(field: &str, fps: f32) -> Result<()> {
    if !fps.is_finite() || fps < 0.0 {
        return Err(TexflowError::Config(format!(
            "{} must be a non-negative number, got {}",
            field, fps
        )));
    }
    Ok(())
}
