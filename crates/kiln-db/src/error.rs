//! Database error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Could not create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed stored value: {0}")]
    Record(#[from] kiln_core::Error),

    #[error("Source file {0} already has an active job")]
    AlreadyQueued(String),

    /// A status change the record's lifecycle does not allow.
    #[error("Cannot move {id} from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },
}

pub type DbResult<T> = Result<T, DbError>;
