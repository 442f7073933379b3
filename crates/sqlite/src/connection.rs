//! Database connection management.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// SQLite-backed `ProcessStorage`.
#[derive(Clone)]
pub struct SqliteStorage {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open a database at the specified path, creating it if needed, and
    /// bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened database");
        Self::initialize(conn)
    }

    /// Open a private in-memory database, mainly for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> crate::Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        crate::migrations::MigrationManager::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn begin(&self) -> crate::Result<SqliteSnapshot> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteSnapshot { conn, open: true })
    }
}

/// An open `BEGIN IMMEDIATE` transaction. Holds the connection until it is
/// committed, aborted or dropped; dropping rolls back.
pub struct SqliteSnapshot {
    conn: OwnedMutexGuard<Connection>,
    open: bool,
}

impl SqliteSnapshot {
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn commit(mut self) -> crate::Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    pub(crate) fn rollback(mut self) -> crate::Result<()> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteSnapshot {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback of dropped snapshot failed");
            }
        }
    }
}
