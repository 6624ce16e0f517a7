//! Error types for extraction.

use thiserror::Error;

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised inside extraction strategies.
///
/// Strategies convert these into failed outcomes; they never escape to the
/// pipeline as errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },

    #[error("Process exited with code {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("No {0} output produced")]
    NoOutput(String),

    #[error("Failed to parse {format}: {message}")]
    Parse { format: String, message: String },
}
