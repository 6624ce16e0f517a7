//! Kiln DB - SQLite datastore for source files, processing tasks,
//! knowledge items, QA pairs and the job queue.

mod database;
mod error;
mod migrations;
mod operations;

pub use database::Database;
pub use error::{DbError, DbResult};
pub use operations::queue::QueueCounts;
