//! Error handling for rowflow-rs
//!
//! This module defines the top-level error type and a Result alias used at
//! the crate's outer API. Each layer keeps its own error enum
//! (`PipelineError`, `StepError`, `SqlError`) that converts into
//! `EngineError`.

use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::QueueError;
use crate::pipeline::step::StepError;
use crate::sql::error::SqlError;
use thiserror::Error;

/// Main error type for rowflow-rs operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Errors building, preparing or running a pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors raised by a step
    #[error("Step error: {0}")]
    Step(#[from] StepError),

    /// Errors parsing, resolving or running a SQL query
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    /// Errors on a row queue
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for rowflow-rs operations
pub type Result<T> = std::result::Result<T, EngineError>;

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
    E: Into<EngineError>,
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
