//! SQLite-backed profile and suggestion-history store.
//!
//! The database lives at `~/.crossings/crossings.db` unless the config names
//! another path. It holds member profiles, their ships and connections, and
//! the suggestion history the deduplicator reads on every scoring pass.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

pub mod profiles;
pub mod suggestions;
pub mod types;
pub use types::*;

pub struct ProfileDb {
    conn: Connection,
}

impl ProfileDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `~/.crossings/crossings.db` and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL lets the CLI read while the watcher loop writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        log::debug!("ProfileDb: opened {}", path.display());
        Ok(Self { conn })
    }

    /// Open a database from a configured path, falling back to the default.
    pub fn open_configured(db_path: Option<&str>) -> Result<Self, DbError> {
        match db_path {
            Some(p) => Self::open_at(expand_home(p)),
            None => Self::open(),
        }
    }

    /// Resolve the default database path: `~/.crossings/crossings.db`.
    fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".crossings").join("crossings.db"))
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(p: &str) -> PathBuf {
    match (p.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(p).to_path_buf(),
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::ProfileDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    pub fn test_db() -> ProfileDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        ProfileDb::open_at(path).expect("Failed to open test database")
    }
}

// =============================================================================
// Tests
// =============================================================================
