//! Shared local store: records, sync queue and sync metadata behind one lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::clock::SharedClock;
use crate::db::{
    Database, LibSqlMetaRepository, LibSqlQueueRepository, LibSqlRecordRepository,
    MetaRepository, QueueRepository, RecordFilter, RecordRepository, SyncMeta,
};
use crate::models::{
    Collection, Priority, QueueEntry, QueueId, Record, RecordId, SyncAction, SyncStatus,
    SyncSummary,
};
use crate::{Error, Result};

/// Thread-safe durable record store and sync queue.
///
/// Cloning shares the same underlying database.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    degraded: Arc<AtomicBool>,
    clock: SharedClock,
}

impl LocalStore {
    /// Open the store at the given filesystem path.
    ///
    /// If the file cannot be opened the store falls back to an in-memory
    /// database for this session and reports itself as degraded.
    pub async fn open_path(db_path: impl Into<PathBuf>, clock: SharedClock) -> Result<Self> {
        let db_path = db_path.into();

        let opened = match db_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent).map_err(Error::from)
            }
            _ => Ok(()),
        };
        let opened = match opened {
            Ok(()) => Database::open(&db_path).await,
            Err(error) => Err(error),
        };

        let (db, degraded) = match opened {
            Ok(db) => {
                tracing::info!("Opened local store at {}", db_path.display());
                (db, false)
            }
            Err(error) => {
                tracing::warn!(
                    "Local store at {} is unavailable ({}); running DEGRADED on an in-memory store for this session",
                    db_path.display(),
                    error
                );
                (Database::open_in_memory().await?, true)
            }
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            degraded: Arc::new(AtomicBool::new(degraded)),
            clock,
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory(clock: SharedClock) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            degraded: Arc::new(AtomicBool::new(false)),
            clock,
        })
    }

    /// Whether writes are currently landing in the in-memory fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Configured on-disk location, even when degraded.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Current time from the injected clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Swap the session onto an in-memory database after a storage failure.
    ///
    /// Returns `false` when already degraded, meaning there is nothing left
    /// to fall back to.
    async fn degrade_to_memory(&self, cause: &Error) -> Result<bool> {
        if self.is_degraded() {
            return Ok(false);
        }

        tracing::warn!(
            "Local store failed during write ({}); switching to DEGRADED in-memory store for this session",
            cause
        );
        let fallback = Database::open_in_memory().await?;
        let mut db = self.db.lock().await;
        let _old = std::mem::replace(&mut *db, fallback);
        self.degraded.store(true, Ordering::SeqCst);
        Ok(true)
    }

    /// Persist a record and return its id. The record is (re)set to `pending`.
    pub async fn put(&self, collection: Collection, record: &Record) -> Result<RecordId> {
        if record.collection != collection {
            return Err(Error::InvalidInput(format!(
                "record {} belongs to {}, not {}",
                record.id, record.collection, collection
            )));
        }

        let first_attempt = {
            let db = self.db.lock().await;
            LibSqlRecordRepository::new(db.connection()).put(record).await
        };

        match first_attempt {
            Ok(()) => Ok(record.id),
            Err(error) if error.is_storage_unavailable() => {
                if self.degrade_to_memory(&error).await? {
                    let db = self.db.lock().await;
                    LibSqlRecordRepository::new(db.connection())
                        .put(record)
                        .await?;
                    Ok(record.id)
                } else {
                    Err(error)
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Fetch a record by id.
    pub async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .get(collection, id)
            .await
    }

    /// List records in a collection.
    pub async fn list(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .list(collection, filter)
            .await
    }

    /// Set a record's sync status.
    pub async fn update_sync_status(
        &self,
        collection: Collection,
        id: &RecordId,
        status: SyncStatus,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .update_sync_status(collection, id, status)
            .await
    }

    /// Mark a record synced with the server-assigned id.
    pub async fn mark_synced(&self, id: &RecordId, server_id: Option<&str>) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .mark_synced(id, server_id)
            .await
    }

    /// Mark a record as terminally failed.
    pub async fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlRecordRepository::new(db.connection())
            .mark_failed(id, error)
            .await
    }

    /// Delete a record and every queue entry that references it.
    pub async fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        let db = self.db.lock().await;
        let conn = db.connection();
        LibSqlQueueRepository::new(conn).remove_for_record(id).await?;
        LibSqlRecordRepository::new(conn).delete(collection, id).await
    }

    /// Append a pending mutation for a record.
    pub async fn enqueue(
        &self,
        action: SyncAction,
        record_id: RecordId,
        priority: Priority,
    ) -> Result<QueueId> {
        let entry = QueueEntry::new(action, record_id, priority, self.now_ms());

        let first_attempt = {
            let db = self.db.lock().await;
            LibSqlQueueRepository::new(db.connection())
                .insert(&entry)
                .await
        };

        match first_attempt {
            Ok(()) => Ok(entry.queue_id),
            Err(error) if error.is_storage_unavailable() => {
                if self.degrade_to_memory(&error).await? {
                    let db = self.db.lock().await;
                    LibSqlQueueRepository::new(db.connection())
                        .insert(&entry)
                        .await?;
                    Ok(entry.queue_id)
                } else {
                    Err(error)
                }
            }
            Err(error) => Err(error),
        }
    }

    /// Persist a record and its queue entry in one transaction.
    ///
    /// This is the write path for every user action: either both rows exist
    /// afterwards or neither does.
    pub async fn record_mutation(
        &self,
        record: &Record,
        action: SyncAction,
    ) -> Result<(RecordId, QueueId)> {
        if record.collection != action.collection() {
            return Err(Error::InvalidInput(format!(
                "action {} cannot reconcile a {} record",
                action,
                record.collection
            )));
        }
        let entry = QueueEntry::new(
            action,
            record.id,
            action.default_priority(),
            self.now_ms(),
        );

        match self.write_mutation(record, &entry).await {
            Ok(()) => Ok((record.id, entry.queue_id)),
            Err(error) if error.is_storage_unavailable() => {
                if self.degrade_to_memory(&error).await? {
                    self.write_mutation(record, &entry).await?;
                    Ok((record.id, entry.queue_id))
                } else {
                    Err(error)
                }
            }
            Err(error) => Err(error),
        }
    }

    async fn write_mutation(&self, record: &Record, entry: &QueueEntry) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;

        let written = async {
            LibSqlRecordRepository::new(conn).put(record).await?;
            LibSqlQueueRepository::new(conn).insert(entry).await
        }
        .await;

        if let Err(error) = written {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error);
        }
        if let Err(error) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
        Ok(())
    }

    /// Rewrite a record as terminally failed and drop everything queued for
    /// it, in one transaction.
    ///
    /// Returns the number of queue entries dropped, or `None` without
    /// writing anything when the server already has the record.
    pub async fn withdraw(&self, record: &Record, reason: &str) -> Result<Option<u64>> {
        let db = self.db.lock().await;
        let conn = db.connection();

        conn.execute("BEGIN TRANSACTION", ()).await?;

        match Self::withdraw_within(conn, record, reason).await {
            Ok(Some(removed)) => {
                if let Err(error) = conn.execute("COMMIT", ()).await {
                    conn.execute("ROLLBACK", ()).await.ok();
                    return Err(error.into());
                }
                Ok(Some(removed))
            }
            Ok(None) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Ok(None)
            }
            Err(error) => {
                conn.execute("ROLLBACK", ()).await.ok();
                Err(error)
            }
        }
    }

    async fn withdraw_within(
        conn: &libsql::Connection,
        record: &Record,
        reason: &str,
    ) -> Result<Option<u64>> {
        let records = LibSqlRecordRepository::new(conn);
        let current = records
            .get(record.collection, &record.id)
            .await?
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;
        if current.sync_status == SyncStatus::Synced {
            return Ok(None);
        }

        let removed = LibSqlQueueRepository::new(conn)
            .remove_for_record(&record.id)
            .await?;
        records.put(record).await?;
        records.mark_failed(&record.id, reason).await?;
        Ok(Some(removed))
    }

    /// Eligible entries in drain order. Does not mutate the queue.
    pub async fn dequeue_next_batch(&self, now_ms: i64, limit: usize) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .next_batch(now_ms, limit)
            .await
    }

    /// Fetch a queue entry.
    pub async fn entry(&self, queue_id: &QueueId) -> Result<Option<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .get(queue_id)
            .await
    }

    /// Entries still referencing a record.
    pub async fn entries_for_record(&self, record_id: &RecordId) -> Result<Vec<QueueEntry>> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .for_record(record_id)
            .await
    }

    /// Remove a queue entry after a definitive outcome.
    pub async fn remove(&self, queue_id: &QueueId) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove(queue_id)
            .await
    }

    /// Remove every entry for a record.
    pub async fn remove_for_record(&self, record_id: &RecordId) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .remove_for_record(record_id)
            .await
    }

    /// Count a failed attempt and push the entry's eligibility out.
    pub async fn increment_retry(
        &self,
        queue_id: &QueueId,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<u32> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection())
            .increment_retry(queue_id, next_attempt_at, error)
            .await
    }

    /// Number of active queue entries.
    pub async fn queue_len(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlQueueRepository::new(db.connection()).len().await
    }

    /// Remember a drain that reached the server.
    pub async fn record_sync_success(&self) -> Result<()> {
        let now = self.now_ms();
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .record_sync_success(now)
            .await
    }

    /// Remember why the last drain stopped early.
    pub async fn record_sync_error(&self, error: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection())
            .record_sync_error(error)
            .await
    }

    /// Drain bookkeeping.
    pub async fn sync_meta(&self) -> Result<SyncMeta> {
        let db = self.db.lock().await;
        LibSqlMetaRepository::new(db.connection()).load().await
    }

    /// Counts for the "N pending, M failed" status line. Local reads only.
    pub async fn summary(&self) -> Result<SyncSummary> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let counts = LibSqlRecordRepository::new(conn).status_counts().await?;
        let queued = LibSqlQueueRepository::new(conn).len().await?;
        let meta = LibSqlMetaRepository::new(conn).load().await?;

        Ok(SyncSummary {
            pending: counts.pending,
            failed: counts.failed,
            total: counts.total(),
            queued,
            degraded: self.is_degraded(),
            last_sync_at: meta.last_sync_at,
        })
    }
}
