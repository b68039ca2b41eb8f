//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::{Path, PathBuf};

use super::migrations;

/// Database wrapper for libSQL connections
pub struct Database {
    // Keeps the libSQL handle alive for as long as the connection is in use.
    _db: LibSqlDatabase,
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a local database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            path: Some(path),
        };
        database.configure(true).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Open an in-memory database (tests and the degraded-mode fallback)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            path: None,
        };
        database.configure(false).await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for durable local writes
    async fn configure(&self, durable: bool) -> Result<()> {
        if durable {
            // WAL + FULL sync: a committed put survives an abrupt process kill.
            // journal_mode returns a row, so it goes through query().
            self.conn.query("PRAGMA journal_mode = WAL;", ()).await?;
            self.conn.execute("PRAGMA synchronous = FULL;", ()).await?;
        }
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Whether this database lives only in memory
    pub const fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// On-disk location, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.is_in_memory());
        assert!(db.path().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_file_creates_schema() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("telecare.db");

        let db = Database::open(&db_path).await.unwrap();
        assert!(!db.is_in_memory());
        assert!(db_path.exists());

        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('records', 'sync_queue')",
                (),
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let tables: i64 = row.get(0).unwrap();
        assert_eq!(tables, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_rejects_non_database_file() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("telecare.db");
        std::fs::write(&db_path, vec![b'x'; 4096]).unwrap();

        let error = Database::open(&db_path).await.err().unwrap();
        assert!(error.is_storage_unavailable(), "unexpected error: {error}");
    }
}
