//! Database statistics operations.

use crate::database::Database;
use crate::error::DbResult;
use kiln_core::DatabaseStats;
use std::collections::HashMap;

impl Database {
    /// Count records per kind and status.
    pub fn stats(&self) -> DbResult<DatabaseStats> {
        let conn = self.conn()?;

        let total_sources: i64 =
            conn.query_row("SELECT COUNT(*) FROM source_files", [], |row| row.get(0))?;

        let sources_by_status = group_counts(
            &conn,
            "SELECT status, COUNT(*) FROM source_files GROUP BY status",
        )?;
        let sources_by_kind =
            group_counts(&conn, "SELECT kind, COUNT(*) FROM source_files GROUP BY kind")?;

        let total_tasks: i64 =
            conn.query_row("SELECT COUNT(*) FROM processing_tasks", [], |row| row.get(0))?;

        let failed_tasks: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_tasks WHERE status = 'failed'",
            [],
            |row| row.get(0),
        )?;

        let total_knowledge_items: i64 =
            conn.query_row("SELECT COUNT(*) FROM knowledge_items", [], |row| row.get(0))?;

        let total_qa_pairs: i64 =
            conn.query_row("SELECT COUNT(*) FROM qa_pairs", [], |row| row.get(0))?;

        let queue = group_counts(&conn, "SELECT status, COUNT(*) FROM queue GROUP BY status")?;

        // Database size (page_count * page_size)
        let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;

        Ok(DatabaseStats {
            total_sources,
            sources_by_status,
            sources_by_kind,
            total_tasks,
            failed_tasks,
            total_knowledge_items,
            total_qa_pairs,
            queue_pending: queue.get("pending").copied().unwrap_or(0),
            queue_processing: queue.get("processing").copied().unwrap_or(0),
            queue_failed: queue.get("failed").copied().unwrap_or(0),
            database_size_bytes: page_count * page_size,
        })
    }
}

fn group_counts(conn: &rusqlite::Connection, sql: &str) -> DbResult<HashMap<String, i64>> {
    let mut counts = HashMap::new();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((key, count))
    })?;
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count);
    }
    Ok(counts)
}
