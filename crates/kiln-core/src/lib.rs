//! Kiln Core - Records and domain types for the Kiln ingestion pipeline.

mod error;
mod types;

pub use error::{Error, Result};
pub use types::*;
