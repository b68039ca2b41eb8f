//! Sync metadata repository (local-only key/value pairs)

use crate::error::Result;
use libsql::Connection;

const LAST_SYNC_AT: &str = "last_sync_at";
const LAST_SYNC_ERROR: &str = "last_sync_error";

/// Bookkeeping about past drains, shown alongside the queue counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMeta {
    /// Last drain that completed against the server (Unix ms)
    pub last_sync_at: Option<i64>,
    /// Last drain-level error, cleared by the next clean drain
    pub last_sync_error: Option<String>,
}

/// Trait for sync metadata operations (async)
#[allow(async_fn_in_trait)]
pub trait MetaRepository {
    async fn load(&self) -> Result<SyncMeta>;

    async fn record_sync_success(&self, at_ms: i64) -> Result<()>;

    async fn record_sync_error(&self, error: &str) -> Result<()>;
}

/// libSQL implementation of `MetaRepository`
pub struct LibSqlMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetaRepository for LibSqlMetaRepository<'_> {
    async fn load(&self) -> Result<SyncMeta> {
        let mut meta = SyncMeta::default();

        if let Some(value) = self.get_value(LAST_SYNC_AT).await? {
            meta.last_sync_at = value.parse().ok();
        }
        meta.last_sync_error = self.get_value(LAST_SYNC_ERROR).await?;

        Ok(meta)
    }

    async fn record_sync_success(&self, at_ms: i64) -> Result<()> {
        self.set_value(LAST_SYNC_AT, &at_ms.to_string()).await?;
        self.conn
            .execute("DELETE FROM sync_meta WHERE key = ?", [LAST_SYNC_ERROR])
            .await?;
        Ok(())
    }

    async fn record_sync_error(&self, error: &str) -> Result<()> {
        self.set_value(LAST_SYNC_ERROR, error).await
    }
}

impl LibSqlMetaRepository<'_> {
    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM sync_meta WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
                [key, value],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_default_meta() {
        let db = setup().await;
        let repo = LibSqlMetaRepository::new(db.connection());

        assert_eq!(repo.load().await.unwrap(), SyncMeta::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_success_clears_previous_error() {
        let db = setup().await;
        let repo = LibSqlMetaRepository::new(db.connection());

        repo.record_sync_error("connection refused").await.unwrap();
        let meta = repo.load().await.unwrap();
        assert_eq!(meta.last_sync_error.as_deref(), Some("connection refused"));

        repo.record_sync_success(42).await.unwrap();
        let meta = repo.load().await.unwrap();
        assert_eq!(meta.last_sync_at, Some(42));
        assert!(meta.last_sync_error.is_none());
    }
}
