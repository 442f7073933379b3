//! Database migration management.

use rusqlite::{params, Connection};

/// Database migration manager.
pub struct MigrationManager;

impl MigrationManager {
    /// Apply all pending migrations to the database.
    pub fn migrate(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            "#,
        )?;

        let current_version = Self::current_version(conn)?.unwrap_or(0);

        if current_version < 1 {
            tracing::info!("applying schema migration 1");
            Self::apply_migration_1(conn)?;
        }

        Ok(())
    }

    /// Migration 1: definitions, progress, completions and activity tables.
    ///
    /// Ids are hyphenated UUID text. Timestamps are fixed-width UTC text
    /// so that they sort lexically. Percentages are decimal text.
    fn apply_migration_1(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            r#"
            -- Forms are owned by the form collaborator; only the columns the
            -- engine renders are mirrored here.
            CREATE TABLE IF NOT EXISTS forms (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                form_id TEXT NOT NULL REFERENCES forms(id) ON DELETE CASCADE,
                session_id TEXT NOT NULL,
                submitted_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processes (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                slug TEXT NOT NULL,
                visibility TEXT NOT NULL CHECK (visibility IN ('public', 'private')),
                access_secret TEXT,
                process_type TEXT NOT NULL CHECK (process_type IN ('linear', 'free')),
                is_active INTEGER NOT NULL DEFAULT 1,
                settings TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                published_at TEXT,
                UNIQUE(slug)
            );

            CREATE TABLE IF NOT EXISTS process_steps (
                id TEXT PRIMARY KEY,
                process_id TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                form_id TEXT NOT NULL REFERENCES forms(id) ON DELETE RESTRICT,
                title TEXT NOT NULL,
                description TEXT,
                order_index INTEGER NOT NULL CHECK (order_index >= 0),
                is_required INTEGER NOT NULL DEFAULT 1,
                conditions TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(process_id, order_index)
            );

            CREATE TABLE IF NOT EXISTS progress (
                id TEXT PRIMARY KEY,
                process_id TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                user_id TEXT,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed', 'abandoned')),
                current_step_index INTEGER NOT NULL DEFAULT 0,
                completion_percentage TEXT NOT NULL DEFAULT '0.00',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                last_activity_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                UNIQUE(process_id, session_id)
            );

            CREATE TABLE IF NOT EXISTS step_completions (
                id TEXT PRIMARY KEY,
                progress_id TEXT NOT NULL REFERENCES progress(id) ON DELETE CASCADE,
                step_id TEXT NOT NULL REFERENCES process_steps(id) ON DELETE CASCADE,
                submission_id TEXT REFERENCES submissions(id) ON DELETE SET NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'skipped')),
                completed_at TEXT,
                UNIQUE(progress_id, step_id)
            );

            CREATE TABLE IF NOT EXISTS process_views (
                id TEXT PRIMARY KEY,
                process_id TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                session_id TEXT NOT NULL,
                ip_address TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                viewed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_processes_owner ON processes(owner_id, slug);
            CREATE INDEX IF NOT EXISTS idx_progress_activity ON progress(status, last_activity_at);
            CREATE INDEX IF NOT EXISTS idx_completions_step ON step_completions(step_id);
            CREATE INDEX IF NOT EXISTS idx_views_process ON process_views(process_id, viewed_at);

            INSERT OR REPLACE INTO schema_migrations (version) VALUES (1);
            "#,
        )?;

        Ok(())
    }

    /// Get the current schema version.
    pub fn current_version(conn: &Connection) -> crate::Result<Option<u32>> {
        let mut stmt = conn.prepare("SELECT MAX(version) FROM schema_migrations")?;

        let version: Option<u32> = stmt.query_row(params![], |row| row.get(0))?;

        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationManager::migrate(&conn).unwrap();
        MigrationManager::migrate(&conn).unwrap();
        assert_eq!(MigrationManager::current_version(&conn).unwrap(), Some(1));
    }

    #[test]
    fn fresh_database_has_no_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY)")
            .unwrap();
        assert_eq!(MigrationManager::current_version(&conn).unwrap(), None);
    }
}
