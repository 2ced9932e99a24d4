//! Pipeline-specific error types.

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Errors raised while building, preparing or driving a pipeline.
///
/// Failures that happen while rows flow are reported per step through
/// `StepError` and surface in the run result instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Step '{name}' error: {message}")]
    Step { name: String, message: String },

    #[error("Node {node_id:?} not found")]
    NodeNotFound { node_id: NodeId },

    #[error("Unknown step '{0}'")]
    UnknownStep(String),

    #[error("Unknown step kind '{0}'")]
    UnknownKind(String),

    #[error("Duplicate step name '{0}'")]
    DuplicateName(String),

    #[error("Invalid hop: {0}")]
    InvalidHop(String),

    #[error("Cycle detected in pipeline graph")]
    CycleDetected,

    #[error("Invalid step configuration for '{step}': {message}")]
    Config { step: String, message: String },

    #[error("Pipeline '{pipeline}' is {actual}, expected {expected}")]
    InvalidState {
        pipeline: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Failed to spawn thread for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
