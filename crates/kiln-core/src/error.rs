//! Record-level errors.

use thiserror::Error;

/// Raised when building or (de)serializing a record.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid record: {0}")]
    InvalidInput(String),

    #[error("Malformed JSON field: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
