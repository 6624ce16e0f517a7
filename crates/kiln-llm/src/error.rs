//! Error types for generation requests.

use thiserror::Error;

/// Errors that can occur when invoking the generation capability.
#[derive(Error, Debug)]
pub enum LlmError {
    /// Request timeout.
    #[error("Request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The requested model is not available.
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    /// Generation server is not reachable.
    #[error("Generation server is not reachable at {host}")]
    ServerNotRunning { host: String },

    /// API returned an error response.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The response carried no message content.
    #[error("Generation returned no content")]
    EmptyResponse,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for generation operations.
pub type LlmResult<T> = Result<T, LlmError>;
