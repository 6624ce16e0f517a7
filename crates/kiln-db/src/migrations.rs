//! Database migrations and schema management.

use crate::error::DbResult;
use rusqlite::Connection;
use tracing::info;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> DbResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating initial database schema...");
        create_initial_schema(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating database from version {} to {}",
            current_version, SCHEMA_VERSION
        );
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> DbResult<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn create_initial_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        r#"
        -- Uploaded assets
        CREATE TABLE IF NOT EXISTS source_files (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            file_url TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            mime_type TEXT,
            uploaded_by TEXT NOT NULL,
            department TEXT,
            content_hash TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_source_files_status ON source_files(status);
        CREATE INDEX IF NOT EXISTS idx_source_files_created ON source_files(created_at);

        -- One row per pipeline stage attempt
        CREATE TABLE IF NOT EXISTS processing_tasks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES source_files(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            error_message TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_source ON processing_tasks(source_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON processing_tasks(status);

        -- Derived text segments
        CREATE TABLE IF NOT EXISTS knowledge_items (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES source_files(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            content TEXT NOT NULL CHECK (length(trim(content)) > 0),
            summary TEXT,
            category TEXT,
            tags TEXT,
            knowledge_type TEXT NOT NULL DEFAULT 'rag',
            status TEXT NOT NULL DEFAULT 'draft',
            created_by TEXT NOT NULL,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_knowledge_source ON knowledge_items(source_id);
        CREATE INDEX IF NOT EXISTS idx_knowledge_created ON knowledge_items(created_at);

        -- Derived question/answer pairs; knowledge_id holds a knowledge or source id
        CREATE TABLE IF NOT EXISTS qa_pairs (
            id TEXT PRIMARY KEY,
            knowledge_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            created_by TEXT NOT NULL,
            reviewed_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_qa_owner ON qa_pairs(knowledge_id);

        -- Pipeline job queue
        CREATE TABLE IF NOT EXISTS queue (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES source_files(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
        CREATE INDEX IF NOT EXISTS idx_queue_priority ON queue(priority DESC);

        -- At most one active job per source file
        CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_active_source
            ON queue(source_id) WHERE status IN ('pending', 'processing');
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }
}
