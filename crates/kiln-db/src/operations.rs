//! Database CRUD operations.

pub mod knowledge;
pub mod qa_pairs;
pub mod queue;
pub mod sources;
pub mod stats;
pub mod tasks;

use chrono::{DateTime, Utc};

/// Parse a stored RFC3339 timestamp, falling back to now for corrupt rows.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_timestamp(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
