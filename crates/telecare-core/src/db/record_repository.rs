//! Record repository implementation

use crate::error::{Error, Result};
use crate::models::{Collection, Record, RecordId, SyncStatus};
use libsql::{params, Connection, Row};

const RECORD_COLUMNS: &str = "id, collection, owner_id, record_date, payload, sync_status, server_id, last_error, created_at, updated_at";

/// Optional narrowing for [`RecordRepository::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Owning patient (served by `idx_records_owner`)
    pub owner_id: Option<String>,
    /// Exact day `YYYY-MM-DD` (served by `idx_records_date`)
    pub date: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    #[must_use]
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_date(date: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = Some(status);
        self
    }

    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Record counts by sync status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub synced: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub const fn total(&self) -> u64 {
        self.pending + self.synced + self.failed
    }
}

/// Trait for record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait RecordRepository {
    /// Insert or replace a record; the stored copy is reset to `pending`
    async fn put(&self, record: &Record) -> Result<()>;

    /// Get a record by collection and ID
    async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>>;

    /// List records in a collection, oldest first
    async fn list(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Set the sync status of a record
    async fn update_sync_status(
        &self,
        collection: Collection,
        id: &RecordId,
        status: SyncStatus,
    ) -> Result<()>;

    /// Mark a record synced and remember the server-assigned id
    async fn mark_synced(&self, id: &RecordId, server_id: Option<&str>) -> Result<()>;

    /// Mark a record failed with the reason
    async fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()>;

    /// Hard delete a record; returns whether it existed
    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool>;

    /// Count records by sync status
    async fn status_counts(&self) -> Result<StatusCounts>;
}

/// libSQL implementation of `RecordRepository`
pub struct LibSqlRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &Row) -> Result<Record> {
        let id: String = row.get(0)?;
        let collection: String = row.get(1)?;
        let payload: String = row.get(4)?;
        let sync_status: String = row.get(5)?;

        Ok(Record {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid record id '{id}'")))?,
            collection: collection.parse()?,
            owner_id: row.get(2)?,
            record_date: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            sync_status: sync_status.parse()?,
            server_id: row.get(6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    async fn collect(&self, mut rows: libsql::Rows) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row)?);
        }
        Ok(records)
    }
}

impl RecordRepository for LibSqlRecordRepository<'_> {
    async fn put(&self, record: &Record) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;

        let rows = self
            .conn
            .execute(
                "INSERT INTO records (id, collection, owner_id, record_date, payload, sync_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     owner_id = excluded.owner_id,
                     record_date = excluded.record_date,
                     payload = excluded.payload,
                     sync_status = 'pending',
                     last_error = NULL,
                     updated_at = excluded.updated_at
                 WHERE records.collection = excluded.collection",
                params![
                    record.id.as_str(),
                    record.collection.as_str(),
                    record.owner_id.clone(),
                    record.record_date.clone(),
                    payload,
                    record.created_at,
                    record.updated_at
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "record {} already exists in another collection",
                record.id
            )));
        }
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        let rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?1 AND id = ?2"),
                params![collection.as_str(), id.as_str()],
            )
            .await?;

        Ok(self.collect(rows).await?.into_iter().next())
    }

    async fn list(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<Record>> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?");
        let mut values: Vec<libsql::Value> = vec![collection.as_str().into()];

        if let Some(owner_id) = &filter.owner_id {
            sql.push_str(" AND owner_id = ?");
            values.push(owner_id.clone().into());
        }
        if let Some(date) = &filter.date {
            sql.push_str(" AND record_date = ?");
            values.push(date.clone().into());
        }
        if let Some(status) = filter.sync_status {
            sql.push_str(" AND sync_status = ?");
            values.push(status.as_str().into());
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(i64::try_from(limit).unwrap_or(i64::MAX).into());
        }

        let rows = self.conn.query(&sql, values).await?;
        self.collect(rows).await
    }

    async fn update_sync_status(
        &self,
        collection: Collection,
        id: &RecordId,
        status: SyncStatus,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_status = ?1 WHERE collection = ?2 AND id = ?3",
                params![status.as_str(), collection.as_str(), id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_synced(&self, id: &RecordId, server_id: Option<&str>) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records
                 SET sync_status = 'synced', server_id = COALESCE(?1, server_id), last_error = NULL
                 WHERE id = ?2",
                params![server_id, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &RecordId, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE records SET sync_status = 'failed', last_error = ?1 WHERE id = ?2",
                params![error, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection.as_str(), id.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT sync_status, COUNT(*) FROM records GROUP BY sync_status",
                (),
            )
            .await?;

        let mut counts = StatusCounts::default();
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let count = u64::try_from(row.get::<i64>(1)?).unwrap_or_default();
            match status.parse()? {
                SyncStatus::Pending => counts.pending = count,
                SyncStatus::Synced => counts.synced = count,
                SyncStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{AppointmentPayload, PatientPayload};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn appointment(patient: &str, at: &str, now: i64) -> Record {
        Record::from_payload(&AppointmentPayload::new(patient, "doctor-1", at), now).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_and_get() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = Record::from_payload(&PatientPayload::new("Meena"), 1_000).unwrap();
        repo.put(&record).await.unwrap();

        let fetched = repo
            .get(Collection::Patient, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, record);

        // Same id in a different collection is not visible
        assert!(repo
            .get(Collection::Appointment, &record.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_resets_status_and_keeps_created_at() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let mut record = appointment("p-1", "2024-06-01T09:00:00Z", 1_000);
        repo.put(&record).await.unwrap();
        repo.mark_synced(&record.id, Some("srv-1")).await.unwrap();

        record.created_at = 9_999;
        record.updated_at = 2_000;
        record.payload["status"] = serde_json::json!("cancelled");
        repo.put(&record).await.unwrap();

        let fetched = repo
            .get(Collection::Appointment, &record.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.sync_status, SyncStatus::Pending);
        assert_eq!(fetched.created_at, 1_000);
        assert_eq!(fetched.updated_at, 2_000);
        assert_eq!(fetched.server_id.as_deref(), Some("srv-1"));
        assert_eq!(fetched.payload["status"], "cancelled");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_rejects_collection_change() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = Record::from_payload(&PatientPayload::new("Meena"), 1_000).unwrap();
        repo.put(&record).await.unwrap();

        let mut moved = record.clone();
        moved.collection = Collection::Prescription;
        assert!(repo.put(&moved).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_by_owner_and_date() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        repo.put(&appointment("p-1", "2024-06-01T09:00:00Z", 1))
            .await
            .unwrap();
        repo.put(&appointment("p-1", "2024-06-02T09:00:00Z", 2))
            .await
            .unwrap();
        repo.put(&appointment("p-2", "2024-06-01T11:00:00Z", 3))
            .await
            .unwrap();

        let for_p1 = repo
            .list(Collection::Appointment, &RecordFilter::owner("p-1"))
            .await
            .unwrap();
        assert_eq!(for_p1.len(), 2);
        assert!(for_p1[0].created_at < for_p1[1].created_at);

        let on_first = repo
            .list(Collection::Appointment, &RecordFilter::on_date("2024-06-01"))
            .await
            .unwrap();
        assert_eq!(on_first.len(), 2);

        let limited = repo
            .list(Collection::Appointment, &RecordFilter::default().with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let patients = repo
            .list(Collection::Patient, &RecordFilter::default())
            .await
            .unwrap();
        assert!(patients.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_transitions_and_counts() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let first = appointment("p-1", "2024-06-01T09:00:00Z", 1);
        let second = appointment("p-1", "2024-06-02T09:00:00Z", 2);
        let third = appointment("p-1", "2024-06-03T09:00:00Z", 3);
        for record in [&first, &second, &third] {
            repo.put(record).await.unwrap();
        }

        repo.update_sync_status(Collection::Appointment, &first.id, SyncStatus::Synced)
            .await
            .unwrap();
        repo.mark_failed(&second.id, "rejected: missing doctor")
            .await
            .unwrap();

        let counts = repo.status_counts().await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 1,
                synced: 1,
                failed: 1
            }
        );
        assert_eq!(counts.total(), 3);

        let failed = repo
            .list(
                Collection::Appointment,
                &RecordFilter::default().with_status(SyncStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].last_error.as_deref(),
            Some("rejected: missing doctor")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_missing_record_is_not_found() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let error = repo
            .update_sync_status(Collection::Patient, &RecordId::new(), SyncStatus::Synced)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete() {
        let db = setup().await;
        let repo = LibSqlRecordRepository::new(db.connection());

        let record = Record::from_payload(&PatientPayload::new("Meena"), 1_000).unwrap();
        repo.put(&record).await.unwrap();

        assert!(repo.delete(Collection::Patient, &record.id).await.unwrap());
        assert!(!repo.delete(Collection::Patient, &record.id).await.unwrap());
        assert!(repo
            .get(Collection::Patient, &record.id)
            .await
            .unwrap()
            .is_none());
    }
}
