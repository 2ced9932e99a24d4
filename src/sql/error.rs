//! SQL layer error types.

use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::QueueError;
use sqlparser::parser::ParserError;
use thiserror::Error;

/// Errors raised while parsing, resolving, generating or running a query.
#[derive(Error, Debug)]
pub enum SqlError {
    /// The text is not valid SQL.
    #[error("SQL syntax error: {0}")]
    Syntax(#[from] ParserError),

    /// Valid SQL outside the supported dialect.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Unknown field '{field}' in '{table}'")]
    UnknownField { field: String, table: String },

    /// A literal cannot be coerced to the type of the field it is compared with.
    #[error("Invalid literal for field '{field}': {message}")]
    InvalidLiteral { field: String, message: String },

    #[error("Cannot push down condition: {0}")]
    PushDown(String),

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Query is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type SqlResult<T> = std::result::Result<T, SqlError>;
