//! Processing task operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::{parse_optional_timestamp, parse_timestamp};
use chrono::Utc;
use kiln_core::{ProcessingTask, TaskKind, TaskStatus};
use rusqlite::params;

const TASK_COLUMNS: &str = "id, source_id, kind, status, progress, result, error_message, \
     created_by, created_at, completed_at";

impl Database {
    /// Insert a new processing task.
    pub fn create_task(&self, task: &ProcessingTask) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO processing_tasks (id, source_id, kind, status, progress, result,
                                          error_message, created_by, created_at, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                task.id,
                task.source_id,
                task.kind.as_str(),
                task.status.as_str(),
                task.progress,
                task.result,
                task.error_message,
                task.created_by,
                task.created_at.to_rfc3339(),
                task.completed_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &str) -> DbResult<ProcessingTask> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM processing_tasks WHERE id = ?1", TASK_COLUMNS),
            params![id],
            row_to_task,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("Task not found: {}", id)),
            _ => DbError::from(e),
        })
    }

    /// List tasks newest first, optionally for one source file.
    pub fn list_tasks(&self, source_id: Option<&str>) -> DbResult<Vec<ProcessingTask>> {
        let conn = self.conn()?;

        let tasks = match source_id {
            Some(source_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM processing_tasks WHERE source_id = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    TASK_COLUMNS
                ))?;
                let rows = stmt.query_map(params![source_id], row_to_task)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM processing_tasks ORDER BY created_at DESC, rowid DESC",
                    TASK_COLUMNS
                ))?;
                let rows = stmt.query_map([], row_to_task)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(tasks)
    }

    /// Raise a task's progress and mark it processing.
    ///
    /// Progress never decreases and terminal tasks are left untouched.
    pub fn advance_task(&self, id: &str, progress: u8) -> DbResult<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE processing_tasks
             SET progress = MAX(progress, ?2), status = 'processing'
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, progress.min(100)],
        )?;

        if rows == 0 {
            drop(conn);
            self.ensure_task_open(id, TaskStatus::Processing)?;
        }

        Ok(())
    }

    /// Mark a task completed with an optional result payload.
    pub fn complete_task(&self, id: &str, result: Option<&serde_json::Value>) -> DbResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE processing_tasks
             SET status = 'completed', progress = 100, result = ?2, completed_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, result, now],
        )?;

        if rows == 0 {
            drop(conn);
            self.ensure_task_open(id, TaskStatus::Completed)?;
        }

        Ok(())
    }

    /// Mark a task failed with a human-readable message.
    pub fn fail_task(&self, id: &str, message: &str) -> DbResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE processing_tasks
             SET status = 'failed', error_message = ?2, completed_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, message, now],
        )?;

        if rows == 0 {
            drop(conn);
            self.ensure_task_open(id, TaskStatus::Failed)?;
        }

        Ok(())
    }

    /// Explain why an update touched no rows.
    fn ensure_task_open(&self, id: &str, to: TaskStatus) -> DbResult<()> {
        let task = self.get_task(id)?;
        Err(DbError::InvalidTransition {
            id: id.to_string(),
            from: task.status.to_string(),
            to: to.to_string(),
        })
    }
}

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<ProcessingTask> {
    let kind_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let progress: i64 = row.get(4)?;
    let created_at_str: String = row.get(8)?;
    let completed_at_str: Option<String> = row.get(9)?;

    Ok(ProcessingTask {
        id: row.get(0)?,
        source_id: row.get(1)?,
        kind: TaskKind::from_str(&kind_str).unwrap_or(TaskKind::Extraction),
        status: TaskStatus::from_str(&status_str).unwrap_or(TaskStatus::Pending),
        progress: progress.clamp(0, 100) as u8,
        result: row.get(5)?,
        error_message: row.get(6)?,
        created_by: row.get(7)?,
        created_at: parse_timestamp(&created_at_str),
        completed_at: parse_optional_timestamp(completed_at_str),
    })
}
