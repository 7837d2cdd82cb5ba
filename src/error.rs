//! Error handling for texflow
//!
//! This module defines the crate-level error type and a Result alias used by
//! configuration and the binary. Pipeline operations use the narrower
//! [`PipelineError`](crate::pipeline::PipelineError), which converts into
//! [`TexflowError`] with `?`.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for texflow operations
#[derive(Error, Debug)]
pub enum TexflowError {
    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// TOML parse errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// Errors from the pipeline graph or a distribution engine
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TexflowError>,
    },
}

impl TexflowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TexflowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for TexflowError {
    fn from(err: serde_json::Error) -> Self {
        TexflowError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TexflowError {
    fn from(err: toml::de::Error) -> Self {
        TexflowError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for TexflowError {
    fn from(err: toml::ser::Error) -> Self {
        TexflowError::Toml(err.to_string())
    }
}

/// Result type alias for texflow operations
pub type Result<T> = std::result::Result<T, TexflowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<TexflowError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
