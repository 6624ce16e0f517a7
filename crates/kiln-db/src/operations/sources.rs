//! Source file operations.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::operations::parse_timestamp;
use chrono::Utc;
use kiln_core::{FileKind, FileStatus, SourceFile};
use rusqlite::{params, Connection, OptionalExtension};

const SOURCE_COLUMNS: &str = "id, name, kind, file_url, file_size, mime_type, uploaded_by, \
     department, content_hash, status, created_at, updated_at";

impl Database {
    /// Insert a new source file.
    pub fn create_source_file(&self, file: &SourceFile) -> DbResult<()> {
        let conn = self.conn()?;
        insert_source_file(&conn, file)
    }

    /// Get a source file by ID.
    pub fn get_source_file(&self, id: &str) -> DbResult<SourceFile> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM source_files WHERE id = ?1", SOURCE_COLUMNS),
            params![id],
            row_to_source_file,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("Source file not found: {}", id))
            }
            _ => DbError::from(e),
        })
    }

    /// List source files newest first, optionally filtered by status.
    pub fn list_source_files(
        &self,
        status: Option<FileStatus>,
        limit: Option<usize>,
    ) -> DbResult<Vec<SourceFile>> {
        let conn = self.conn()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let files = match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM source_files WHERE status = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    SOURCE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![s.as_str(), limit], row_to_source_file)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM source_files ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    SOURCE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![limit], row_to_source_file)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(files)
    }

    /// Atomically move a source file from `pending` to `processing`.
    ///
    /// Returns `false` when the file exists but is not pending, so a second
    /// run for the same file never starts.
    pub fn claim_source_file(&self, id: &str) -> DbResult<bool> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE source_files SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;

        if rows == 1 {
            return Ok(true);
        }

        let exists: Option<String> = conn
            .query_row(
                "SELECT status FROM source_files WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match exists {
            Some(_) => Ok(false),
            None => Err(DbError::NotFound(format!("Source file not found: {}", id))),
        }
    }

    /// Move a processing source file to a terminal status.
    pub fn finish_source_file(&self, id: &str, status: FileStatus) -> DbResult<()> {
        let conn = self.conn()?;

        let current: String = conn
            .query_row(
                "SELECT status FROM source_files WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::NotFound(format!("Source file not found: {}", id))
                }
                _ => DbError::from(e),
            })?;

        let from = FileStatus::from_str(&current).unwrap_or(FileStatus::Pending);
        if !status.is_terminal() || !from.can_transition_to(status) {
            return Err(DbError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE source_files SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, status.as_str(), now],
        )?;

        // Lost a race with another writer
        if rows == 0 {
            return Err(DbError::InvalidTransition {
                id: id.to_string(),
                from: from.to_string(),
                to: status.to_string(),
            });
        }

        Ok(())
    }

    /// Count source files.
    pub fn count_source_files(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM source_files", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn row_to_source_file(row: &rusqlite::Row) -> rusqlite::Result<SourceFile> {
    let kind_str: String = row.get(2)?;
    let status_str: String = row.get(9)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    Ok(SourceFile {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: FileKind::from_str(&kind_str).unwrap_or(FileKind::Other),
        file_url: row.get(3)?,
        file_size: row.get(4)?,
        mime_type: row.get(5)?,
        uploaded_by: row.get(6)?,
        department: row.get(7)?,
        content_hash: row.get(8)?,
        status: FileStatus::from_str(&status_str).unwrap_or(FileStatus::Pending),
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

pub(crate) fn insert_source_file(conn: &Connection, file: &SourceFile) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO source_files (id, name, kind, file_url, file_size, mime_type, uploaded_by,
                                  department, content_hash, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            file.id,
            file.name,
            file.kind.as_str(),
            file.file_url,
            file.file_size,
            file.mime_type,
            file.uploaded_by,
            file.department,
            file.content_hash,
            file.status.as_str(),
            file.created_at.to_rfc3339(),
            file.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}
