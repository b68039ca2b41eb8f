//! Sync queue repository implementation

use crate::error::{Error, Result};
use crate::models::{Priority, QueueEntry, QueueId, RecordId};
use libsql::{params, Connection, Row};

const QUEUE_COLUMNS: &str = "queue_id, action, collection, record_id, priority, retry_count, enqueued_at, next_attempt_at, last_error";

/// Trait for sync queue operations (async)
///
/// Reads never mutate; entries only leave the queue through an explicit
/// [`QueueRepository::remove`] after a definitive outcome.
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Persist a new entry
    async fn insert(&self, entry: &QueueEntry) -> Result<()>;

    /// Eligible entries ordered by priority desc, enqueued_at asc, queue_id asc
    ///
    /// Only the oldest entry of each record is eligible, so a record's
    /// mutations reach the server in the order they were made.
    async fn next_batch(&self, now_ms: i64, limit: usize) -> Result<Vec<QueueEntry>>;

    /// Get a single entry
    async fn get(&self, queue_id: &QueueId) -> Result<Option<QueueEntry>>;

    /// All entries referencing a record, in drain order
    async fn for_record(&self, record_id: &RecordId) -> Result<Vec<QueueEntry>>;

    /// Remove an entry; returns whether it existed
    async fn remove(&self, queue_id: &QueueId) -> Result<bool>;

    /// Remove every entry referencing a record; returns how many were removed
    async fn remove_for_record(&self, record_id: &RecordId) -> Result<u64>;

    /// Bump the retry counter, reschedule, and return the new count
    async fn increment_retry(
        &self,
        queue_id: &QueueId,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<u32>;

    /// Number of active entries
    async fn len(&self) -> Result<u64>;
}

/// libSQL implementation of `QueueRepository`
pub struct LibSqlQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row) -> Result<QueueEntry> {
        let queue_id: String = row.get(0)?;
        let action: String = row.get(1)?;
        let collection: String = row.get(2)?;
        let record_id: String = row.get(3)?;
        let retry_count: i64 = row.get(5)?;

        Ok(QueueEntry {
            queue_id: queue_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid queue id '{queue_id}'")))?,
            action: action.parse()?,
            collection: collection.parse()?,
            record_id: record_id
                .parse()
                .map_err(|_| Error::Database(format!("invalid record id '{record_id}'")))?,
            priority: Priority::from_rank(row.get(4)?),
            retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
            enqueued_at: row.get(6)?,
            next_attempt_at: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    async fn collect(&self, mut rows: libsql::Rows) -> Result<Vec<QueueEntry>> {
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(Self::parse_entry(&row)?);
        }
        Ok(entries)
    }
}

impl QueueRepository for LibSqlQueueRepository<'_> {
    async fn insert(&self, entry: &QueueEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_queue (queue_id, action, collection, record_id, priority, retry_count, enqueued_at, next_attempt_at, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.queue_id.as_str(),
                    entry.action.as_str(),
                    entry.collection.as_str(),
                    entry.record_id.as_str(),
                    entry.priority.rank(),
                    i64::from(entry.retry_count),
                    entry.enqueued_at,
                    entry.next_attempt_at,
                    entry.last_error.clone()
                ],
            )
            .await?;
        Ok(())
    }

    async fn next_batch(&self, now_ms: i64, limit: usize) -> Result<Vec<QueueEntry>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {QUEUE_COLUMNS} FROM sync_queue AS q
                     WHERE q.next_attempt_at <= ?1
                       AND NOT EXISTS (
                           SELECT 1 FROM sync_queue AS earlier
                           WHERE earlier.record_id = q.record_id
                             AND (earlier.enqueued_at < q.enqueued_at
                                  OR (earlier.enqueued_at = q.enqueued_at
                                      AND earlier.queue_id < q.queue_id))
                       )
                     ORDER BY q.priority DESC, q.enqueued_at ASC, q.queue_id ASC
                     LIMIT ?2"
                ),
                params![now_ms, i64::try_from(limit).unwrap_or(i64::MAX)],
            )
            .await?;
        self.collect(rows).await
    }

    async fn get(&self, queue_id: &QueueId) -> Result<Option<QueueEntry>> {
        let rows = self
            .conn
            .query(
                &format!("SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE queue_id = ?1"),
                params![queue_id.as_str()],
            )
            .await?;
        Ok(self.collect(rows).await?.into_iter().next())
    }

    async fn for_record(&self, record_id: &RecordId) -> Result<Vec<QueueEntry>> {
        let rows = self
            .conn
            .query(
                &format!(
                    "SELECT {QUEUE_COLUMNS} FROM sync_queue
                     WHERE record_id = ?1
                     ORDER BY priority DESC, enqueued_at ASC, queue_id ASC"
                ),
                params![record_id.as_str()],
            )
            .await?;
        self.collect(rows).await
    }

    async fn remove(&self, queue_id: &QueueId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE queue_id = ?1",
                params![queue_id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn remove_for_record(&self, record_id: &RecordId) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM sync_queue WHERE record_id = ?1",
                params![record_id.as_str()],
            )
            .await?;
        Ok(rows)
    }

    async fn increment_retry(
        &self,
        queue_id: &QueueId,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<u32> {
        let mut rows = self
            .conn
            .query(
                "UPDATE sync_queue
                 SET retry_count = retry_count + 1, next_attempt_at = ?1, last_error = ?2
                 WHERE queue_id = ?3
                 RETURNING retry_count",
                params![next_attempt_at, error, queue_id.as_str()],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Err(Error::NotFound(queue_id.to_string()));
        };
        let retry_count: i64 = row.get(0)?;
        Ok(u32::try_from(retry_count).unwrap_or(u32::MAX))
    }

    async fn len(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM sync_queue", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::SyncAction;
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn entry(action: SyncAction, enqueued_at: i64) -> QueueEntry {
        QueueEntry::new(action, RecordId::new(), action.default_priority(), enqueued_at)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_insert_and_get() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let queued = entry(SyncAction::BookAppointment, 100);
        repo.insert(&queued).await.unwrap();

        let fetched = repo.get(&queued.queue_id).await.unwrap().unwrap();
        assert_eq!(fetched, queued);
        assert_eq!(repo.len().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_orders_priority_then_fifo() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let first = entry(SyncAction::BookAppointment, 100);
        let second = entry(SyncAction::SavePrescription, 200);
        let sos = entry(SyncAction::EmergencySos, 300);
        for queued in [&first, &second, &sos] {
            repo.insert(queued).await.unwrap();
        }

        let batch = repo.next_batch(1_000, 10).await.unwrap();
        let order: Vec<_> = batch.iter().map(|queued| queued.queue_id).collect();
        assert_eq!(order, vec![sos.queue_id, first.queue_id, second.queue_id]);

        // Reading does not consume
        assert_eq!(repo.len().await.unwrap(), 3);
        assert_eq!(repo.next_batch(1_000, 2).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_skips_entries_in_backoff() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let queued = entry(SyncAction::BookAppointment, 100);
        repo.insert(&queued).await.unwrap();

        let count = repo
            .increment_retry(&queued.queue_id, 5_000, "timeout")
            .await
            .unwrap();
        assert_eq!(count, 1);

        assert!(repo.next_batch(4_999, 10).await.unwrap().is_empty());
        let batch = repo.next_batch(5_000, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].retry_count, 1);
        assert_eq!(batch[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_batch_holds_later_entries_behind_oldest_for_record() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let record_id = RecordId::new();
        let create = QueueEntry::new(SyncAction::CreatePatient, record_id, Priority::Normal, 100);
        let update = QueueEntry::new(SyncAction::UpdatePatient, record_id, Priority::Normal, 200);
        let other = entry(SyncAction::BookAppointment, 300);
        for queued in [&create, &update, &other] {
            repo.insert(queued).await.unwrap();
        }

        let batch = repo.next_batch(1_000, 10).await.unwrap();
        let order: Vec<_> = batch.iter().map(|queued| queued.queue_id).collect();
        assert_eq!(order, vec![create.queue_id, other.queue_id]);

        // The create backs off; its update waits with it.
        repo.increment_retry(&create.queue_id, 5_000, "HTTP 503")
            .await
            .unwrap();
        let batch = repo.next_batch(1_000, 10).await.unwrap();
        let order: Vec<_> = batch.iter().map(|queued| queued.queue_id).collect();
        assert_eq!(order, vec![other.queue_id]);

        repo.remove(&create.queue_id).await.unwrap();
        let batch = repo.next_batch(1_000, 10).await.unwrap();
        let order: Vec<_> = batch.iter().map(|queued| queued.queue_id).collect();
        assert_eq!(order, vec![update.queue_id, other.queue_id]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_increment_retry_is_monotonic() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let queued = entry(SyncAction::AddHealthRecord, 100);
        repo.insert(&queued).await.unwrap();

        let mut counts = Vec::new();
        for attempt in 0..3 {
            counts.push(
                repo.increment_retry(&queued.queue_id, 100 + attempt, "503")
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(counts, vec![1, 2, 3]);

        let missing = repo
            .increment_retry(&QueueId::new(), 0, "x")
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remove_and_remove_for_record() {
        let db = setup().await;
        let repo = LibSqlQueueRepository::new(db.connection());

        let record_id = RecordId::new();
        let create = QueueEntry::new(SyncAction::CreatePatient, record_id, Priority::Normal, 1);
        let update = QueueEntry::new(SyncAction::UpdatePatient, record_id, Priority::Normal, 2);
        let other = entry(SyncAction::BookAppointment, 3);
        for queued in [&create, &update, &other] {
            repo.insert(queued).await.unwrap();
        }

        assert_eq!(repo.for_record(&record_id).await.unwrap().len(), 2);
        assert!(repo.remove(&other.queue_id).await.unwrap());
        assert!(!repo.remove(&other.queue_id).await.unwrap());
        assert_eq!(repo.remove_for_record(&record_id).await.unwrap(), 2);
        assert_eq!(repo.len().await.unwrap(), 0);
    }
}
