//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(conn, 1, &V1_STATEMENTS).await?;
    }
    if version < 2 {
        apply(conn, 2, &V2_STATEMENTS).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Version 1: records with owner/date secondary indexes, and the sync queue
const V1_STATEMENTS: [&str; 8] = [
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        owner_id TEXT,
        record_date TEXT,
        payload TEXT NOT NULL,
        sync_status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_records_owner ON records(collection, owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_records_date ON records(collection, record_date)",
    "CREATE INDEX IF NOT EXISTS idx_records_status ON records(sync_status)",
    "CREATE TABLE IF NOT EXISTS sync_queue (
        queue_id TEXT PRIMARY KEY,
        action TEXT NOT NULL,
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        priority INTEGER NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        enqueued_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_order ON sync_queue(priority DESC, enqueued_at ASC, queue_id ASC)",
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(record_id)",
];

/// Version 2: backoff scheduling, failure details and sync metadata.
/// Additive only.
const V2_STATEMENTS: [&str; 5] = [
    "ALTER TABLE sync_queue ADD COLUMN next_attempt_at INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE sync_queue ADD COLUMN last_error TEXT",
    "ALTER TABLE records ADD COLUMN server_id TEXT",
    "ALTER TABLE records ADD COLUMN last_error TEXT",
    "CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
];

/// Apply one migration inside a transaction and record its version
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}
