//! Error types for the ingestion pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur while uploading or processing a file.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] kiln_db::DbError),

    #[error("Config error: {0}")]
    Config(#[from] kiln_config::ConfigError),

    #[error("Invalid record: {0}")]
    Record(#[from] kiln_core::Error),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Source file {id} cannot be processed while {status}")]
    NotClaimable { id: String, status: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Job failed: {0}")]
    Job(String),
}

/// Result type for derivation stages.
pub type DeriveResult<T> = Result<T, DeriveError>;

/// Errors from a single derivation stage. These fail the stage's task only.
#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("Generation failed: {0}")]
    Generation(#[from] kiln_llm::LlmError),

    #[error("Malformed {stage} response: {message}")]
    Malformed { stage: &'static str, message: String },
}
