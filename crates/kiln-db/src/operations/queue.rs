//! Pipeline job queue operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::sources::insert_source_file;
use crate::operations::{parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use kiln_core::{QueueItem, QueueStatus, SourceFile};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

const QUEUE_COLUMNS: &str =
    "id, source_id, status, priority, attempts, error, created_at, started_at, completed_at";

/// Number of queue jobs in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
}

impl Database {
    /// Add a job to the queue.
    ///
    /// Fails with [`DbError::AlreadyQueued`] when the source file already has
    /// a pending or processing job.
    pub fn enqueue(&self, item: &QueueItem) -> DbResult<()> {
        let conn = self.conn()?;
        insert_queue_item(&conn, item)
    }

    /// Insert a new source file together with its first job. Neither row is
    /// written if either insert fails.
    pub fn create_queued_source_file(&self, file: &SourceFile, item: &QueueItem) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_source_file(&tx, file)?;
        insert_queue_item(&tx, item)?;
        tx.commit()?;
        Ok(())
    }

    /// Get a queue job by ID.
    pub fn get_queue_item(&self, id: &str) -> DbResult<QueueItem> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM queue WHERE id = ?1", QUEUE_COLUMNS),
            params![id],
            row_to_queue_item,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("Queue item not found: {}", id))
            }
            _ => DbError::from(e),
        })
    }

    /// Claim the next pending job (marks it as processing).
    ///
    /// The claim is a single conditional update, so two workers never take
    /// the same job.
    pub fn dequeue(&self) -> DbResult<Option<QueueItem>> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        loop {
            let candidate: Option<String> = conn
                .query_row(
                    "SELECT id FROM queue
                     WHERE status = 'pending'
                     ORDER BY priority DESC, created_at ASC, rowid ASC
                     LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let claimed = conn.execute(
                "UPDATE queue SET status = 'processing', started_at = ?2, attempts = attempts + 1
                 WHERE id = ?1 AND status = 'pending'",
                params![id, now],
            )?;

            if claimed == 1 {
                let item = conn.query_row(
                    &format!("SELECT {} FROM queue WHERE id = ?1", QUEUE_COLUMNS),
                    params![id],
                    row_to_queue_item,
                )?;
                return Ok(Some(item));
            }
            // Another connection took it; look again
        }
    }

    /// Claim the pending job for one source file, if there is one.
    pub fn dequeue_source(&self, source_id: &str) -> DbResult<Option<QueueItem>> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let id: Option<String> = conn
            .query_row(
                "UPDATE queue SET status = 'processing', started_at = ?2, attempts = attempts + 1
                 WHERE source_id = ?1 AND status = 'pending'
                 RETURNING id",
                params![source_id, now],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(conn.query_row(
                &format!("SELECT {} FROM queue WHERE id = ?1", QUEUE_COLUMNS),
                params![id],
                row_to_queue_item,
            )?)),
            None => Ok(None),
        }
    }

    /// Mark a queue job as done.
    pub fn mark_done(&self, id: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE queue SET status = 'done', completed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Queue item not found: {}", id)));
        }

        Ok(())
    }

    /// Mark a queue job as failed.
    pub fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE queue SET status = 'failed', error = ?2, completed_at = ?3 WHERE id = ?1",
            params![id, error, now],
        )?;

        if rows == 0 {
            return Err(DbError::NotFound(format!("Queue item not found: {}", id)));
        }

        Ok(())
    }

    /// Fail `processing` jobs claimed at or before `started_before`.
    ///
    /// Jobs claimed later are assumed to belong to a live worker and are left
    /// alone. Returns the source ids of the failed jobs so their files can be
    /// settled too.
    pub fn fail_stale_jobs(&self, reason: &str, started_before: DateTime<Utc>) -> DbResult<Vec<String>> {
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;

        let stale: Vec<(String, String)> = {
            let mut stmt =
                tx.prepare("SELECT id, source_id, started_at FROM queue WHERE status = 'processing'")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|(_, _, started_at)| {
                    parse_optional_timestamp(started_at.clone())
                        .map_or(true, |at| at <= started_before)
                })
                .map(|(id, source_id, _)| (id, source_id))
                .collect()
        };

        for (id, _) in &stale {
            tx.execute(
                "UPDATE queue SET status = 'failed', error = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'processing'",
                params![id, reason, now],
            )?;
        }
        tx.commit()?;

        Ok(stale.into_iter().map(|(_, source_id)| source_id).collect())
    }

    /// List queue jobs, optionally by status.
    pub fn list_queue(&self, status: Option<QueueStatus>) -> DbResult<Vec<QueueItem>> {
        let conn = self.conn()?;

        let items = match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM queue WHERE status = ?1 ORDER BY priority DESC, created_at ASC",
                    QUEUE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![s.as_str()], row_to_queue_item)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM queue ORDER BY priority DESC, created_at ASC",
                    QUEUE_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_queue_item)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(items)
    }

    /// Check if a source file has an active job.
    pub fn is_queued(&self, source_id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE source_id = ?1 AND status IN ('pending', 'processing')",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get queue counts by status.
    pub fn queue_counts(&self) -> DbResult<QueueCounts> {
        let conn = self.conn()?;
        let mut counts = QueueCounts::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        for row in rows {
            let (status, count) = row?;
            match QueueStatus::from_str(&status) {
                Some(QueueStatus::Pending) => counts.pending = count,
                Some(QueueStatus::Processing) => counts.processing = count,
                Some(QueueStatus::Done) => counts.done = count,
                Some(QueueStatus::Failed) => counts.failed = count,
                None => {}
            }
        }

        Ok(counts)
    }
}

fn insert_queue_item(conn: &Connection, item: &QueueItem) -> DbResult<()> {
    let result = conn.execute(
        r#"
        INSERT INTO queue (id, source_id, status, priority, attempts, error, created_at, started_at, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            item.id,
            item.source_id,
            item.status.as_str(),
            item.priority,
            item.attempts,
            item.error,
            item.created_at.to_rfc3339(),
            item.started_at.map(|dt| dt.to_rfc3339()),
            item.completed_at.map(|dt| dt.to_rfc3339()),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                && matches!(item.status, QueueStatus::Pending | QueueStatus::Processing) =>
        {
            Err(DbError::AlreadyQueued(item.source_id.clone()))
        }
        Err(e) => Err(DbError::from(e)),
    }
}

fn row_to_queue_item(row: &rusqlite::Row) -> rusqlite::Result<QueueItem> {
    let status_str: String = row.get(2)?;
    let created_at_str: String = row.get(6)?;
    let started_at_str: Option<String> = row.get(7)?;
    let completed_at_str: Option<String> = row.get(8)?;

    Ok(QueueItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        status: QueueStatus::from_str(&status_str).unwrap_or_default(),
        priority: row.get(3)?,
        attempts: row.get(4)?,
        error: row.get(5)?,
        created_at: parse_timestamp(&created_at_str),
        started_at: parse_optional_timestamp(started_at_str),
        completed_at: parse_optional_timestamp(completed_at_str),
    })
}
