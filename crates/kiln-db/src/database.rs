//! Pooled SQLite handle shared by the uploader, workers and CLI queries.

use crate::error::{DbError, DbResult};
use crate::migrations;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use tracing::{debug, info};

pub type ConnectionPool = Pool<SqliteConnectionManager>;
pub type PooledConn = PooledConnection<SqliteConnectionManager>;

/// Connections on disk: enough for every worker plus the CLI.
const FILE_POOL_SIZE: u32 = 8;

/// Database handle. Clones share one pool.
///
/// Operations take a pooled connection for their own duration only; never
/// call another operation while holding one, since the in-memory pool has a
/// single connection.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open (creating if needed) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {}", path.display());

        // WAL lets queries read while a worker writes; busy_timeout covers
        // two workers claiming at once.
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        Self::from_manager(manager, FILE_POOL_SIZE)
    }

    /// Open a private in-memory database, used by tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));

        // Each in-memory connection is its own database
        Self::from_manager(manager, 1)
    }

    fn from_manager(manager: SqliteConnectionManager, size: u32) -> DbResult<Self> {
        let pool = Pool::builder().max_size(size).build(manager)?;
        migrations::initialize_schema(&*pool.get()?)?;
        debug!("Database pool ready ({} connections)", size);
        Ok(Self { pool })
    }

    /// Borrow a connection from the pool.
    pub fn conn(&self) -> DbResult<PooledConn> {
        self.pool.get().map_err(DbError::from)
    }

    /// `PRAGMA integrity_check` reports `ok`.
    pub fn integrity_check(&self) -> DbResult<bool> {
        let conn = self.conn()?;
        let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(verdict == "ok")
    }
}
