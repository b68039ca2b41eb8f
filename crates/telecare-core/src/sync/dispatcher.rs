//! Drains the sync queue against the remote service.
//!
//! At most one drain runs at a time per dispatcher (and its clones). Every
//! trigger that arrives while a drain is running is a no-op, except the
//! emergency fast path, which flags the running drain to re-poll before it
//! goes idle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{QueueEntry, QueueId, SyncStatus};
use crate::network::NetworkMonitor;
use crate::services::LocalStore;
use crate::{Error, Result};

use super::backoff::BackoffPolicy;
use super::transport::{SyncError, SyncRequest, SyncTransport};

/// Tunables for a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Transient failures after which a normal entry becomes terminal.
    pub retry_ceiling: u32,
    /// Entries fetched per queue read.
    pub batch_size: usize,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: 3,
            batch_size: 25,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Per-drain counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries handed to the transport
    pub dispatched: usize,
    /// Entries the server accepted
    pub synced: usize,
    /// Entries rescheduled after a transient failure
    pub retried: usize,
    /// Entries that became terminal
    pub failed: usize,
    /// Stale entries removed without a network call
    pub dropped: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: Self) {
        self.dispatched += other.dispatched;
        self.synced += other.synced;
        self.retried += other.retried;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

/// Result of a drain trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain holds the in-flight flag; nothing was done.
    AlreadyDraining,
    /// The network was (or went) offline; remaining entries stay queued.
    Offline,
    Completed(DrainReport),
}

impl DrainOutcome {
    pub const fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

enum Flow {
    Continue,
    Offline,
}

/// Releases the in-flight flag when dropped, including on error.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queue drainer. Cloning shares the in-flight state.
#[derive(Clone)]
pub struct SyncDispatcher {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    monitor: NetworkMonitor,
    config: DispatcherConfig,
    in_flight: Arc<AtomicBool>,
    urgent: Arc<AtomicBool>,
}

impl SyncDispatcher {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        monitor: NetworkMonitor,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            transport,
            monitor,
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
            urgent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub const fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    fn try_begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Drain every eligible entry.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if !self.try_begin() {
            tracing::debug!("Sync drain already in flight; trigger ignored");
            return Ok(DrainOutcome::AlreadyDraining);
        }
        self.run_while_held(None).await
    }

    /// Dispatch one entry right away, bypassing the cadence.
    ///
    /// If a drain is already running it is flagged to re-poll the queue
    /// before going idle, and this returns `AlreadyDraining`.
    pub async fn dispatch_urgent(&self, queue_id: &QueueId) -> Result<DrainOutcome> {
        let Some(entry) = self.store.entry(queue_id).await? else {
            return Ok(DrainOutcome::Completed(DrainReport::default()));
        };

        if self.try_begin() {
            return self.run_while_held(Some(entry)).await;
        }

        self.urgent.store(true, Ordering::SeqCst);
        if self.try_begin() {
            // The previous drain ended before it could see the flag.
            return self.run_while_held(None).await;
        }
        tracing::debug!("Urgent entry {} handed to running drain", entry.queue_id);
        Ok(DrainOutcome::AlreadyDraining)
    }

    /// Caller holds the in-flight flag.
    async fn run_while_held(&self, mut single: Option<QueueEntry>) -> Result<DrainOutcome> {
        let mut total = DrainReport::default();
        loop {
            let outcome = {
                let _in_flight = InFlight(&self.in_flight);
                match single.take() {
                    Some(entry) => self.dispatch_single(&entry).await?,
                    None => self.drain_held().await?,
                }
            };

            match outcome {
                DrainOutcome::Completed(report) => {
                    total.absorb(report);
                    if self.urgent.load(Ordering::SeqCst) && self.try_begin() {
                        continue;
                    }
                    return Ok(DrainOutcome::Completed(total));
                }
                other => return Ok(other),
            }
        }
    }

    async fn dispatch_single(&self, entry: &QueueEntry) -> Result<DrainOutcome> {
        let mut report = DrainReport::default();
        let mut last_error = None;
        match self.process_entry(entry, &mut report, &mut last_error).await? {
            Flow::Offline => Ok(DrainOutcome::Offline),
            Flow::Continue => Ok(DrainOutcome::Completed(report)),
        }
    }

    async fn drain_held(&self) -> Result<DrainOutcome> {
        // Everything enqueued before this point is picked up by the reads below.
        self.urgent.store(false, Ordering::SeqCst);

        if !self.monitor.is_online() {
            tracing::debug!("Skipping sync drain while offline");
            return Ok(DrainOutcome::Offline);
        }

        let mut report = DrainReport::default();
        let mut attempted: HashSet<QueueId> = HashSet::new();
        let mut last_error = None;

        'batches: loop {
            let batch = self
                .store
                .dequeue_next_batch(self.store.now_ms(), self.config.batch_size)
                .await?;
            let fresh: Vec<QueueEntry> = batch
                .into_iter()
                .filter(|entry| !attempted.contains(&entry.queue_id))
                .collect();
            if fresh.is_empty() {
                break;
            }

            for entry in fresh {
                attempted.insert(entry.queue_id);
                if let Flow::Offline = self
                    .process_entry(&entry, &mut report, &mut last_error)
                    .await?
                {
                    tracing::info!(
                        "Network went offline mid-drain after {} entries; the rest stay queued",
                        report.dispatched
                    );
                    self.store
                        .record_sync_error("network went offline during sync")
                        .await?;
                    return Ok(DrainOutcome::Offline);
                }
                // An emergency was enqueued meanwhile; re-read so it goes next.
                if self.urgent.swap(false, Ordering::SeqCst) {
                    continue 'batches;
                }
            }
        }

        // A drain with nothing eligible says nothing about the server.
        if report.dispatched > 0 || report.dropped > 0 {
            match &last_error {
                Some(error) => self.store.record_sync_error(error).await?,
                None => self.store.record_sync_success().await?,
            }
        }
        tracing::info!(
            "Sync drain finished: dispatched={}, synced={}, retried={}, failed={}, dropped={}",
            report.dispatched,
            report.synced,
            report.retried,
            report.failed,
            report.dropped
        );
        Ok(DrainOutcome::Completed(report))
    }

    async fn process_entry(
        &self,
        entry: &QueueEntry,
        report: &mut DrainReport,
        last_error: &mut Option<String>,
    ) -> Result<Flow> {
        if !self.monitor.is_online() {
            return Ok(Flow::Offline);
        }

        let Some(record) = self.store.get(entry.collection, &entry.record_id).await? else {
            tracing::debug!(
                "Dropping queue entry {}: record {} no longer exists",
                entry.queue_id,
                entry.record_id
            );
            self.store.remove(&entry.queue_id).await?;
            report.dropped += 1;
            return Ok(Flow::Continue);
        };

        if record.sync_status == SyncStatus::Synced {
            tracing::debug!(
                "Dropping stale queue entry {}: record {} is already synced",
                entry.queue_id,
                entry.record_id
            );
            self.store.remove(&entry.queue_id).await?;
            report.dropped += 1;
            return Ok(Flow::Continue);
        }

        tracing::debug!(
            "Dispatching {} for {} {} (attempt {})",
            entry.action,
            entry.collection,
            entry.record_id,
            entry.retry_count + 1
        );
        report.dispatched += 1;
        let request = SyncRequest::new(entry, record);

        match self.transport.send(&request).await {
            Ok(ack) => {
                // An entry withdrawn while in flight (a cancelled SOS) no
                // longer owns the record's status.
                let owned = self.store.remove(&entry.queue_id).await?;
                if owned
                    && self
                        .store
                        .entries_for_record(&entry.record_id)
                        .await?
                        .is_empty()
                {
                    ignore_missing(
                        self.store
                            .mark_synced(&entry.record_id, ack.server_id.as_deref())
                            .await,
                    )?;
                }
                report.synced += 1;
            }
            Err(SyncError::Rejected(message)) => {
                tracing::error!(
                    "Server rejected {} for {} {}: {}",
                    entry.action,
                    entry.collection,
                    entry.record_id,
                    message
                );
                if self.store.remove(&entry.queue_id).await? {
                    ignore_missing(self.store.mark_failed(&entry.record_id, &message).await)?;
                }
                report.failed += 1;
            }
            Err(SyncError::Transient(message)) => {
                self.handle_transient(entry, &message, report).await?;
                *last_error = Some(message);
            }
        }

        Ok(Flow::Continue)
    }

    async fn handle_transient(
        &self,
        entry: &QueueEntry,
        message: &str,
        report: &mut DrainReport,
    ) -> Result<()> {
        let attempt = entry.retry_count.saturating_add(1);
        let emergency = entry.is_emergency();
        let next_attempt_at =
            self.config
                .backoff
                .next_attempt_at(self.store.now_ms(), attempt, emergency);

        let retry_count = match self
            .store
            .increment_retry(&entry.queue_id, next_attempt_at, message)
            .await
        {
            Ok(count) => count,
            // Removed while the request was in flight (cancelled or deleted).
            Err(Error::NotFound(_)) => return Ok(()),
            Err(error) => return Err(error),
        };

        if !emergency && retry_count >= self.config.retry_ceiling {
            let reason = format!("gave up after {retry_count} attempts: {message}");
            tracing::error!(
                "Sync of {} {} failed permanently: {}",
                entry.collection,
                entry.record_id,
                reason
            );
            self.store.remove(&entry.queue_id).await?;
            ignore_missing(self.store.mark_failed(&entry.record_id, &reason).await)?;
            report.failed += 1;
        } else {
            tracing::warn!(
                "Transient sync failure for {} {} (attempt {}): {}; next try at {}",
                entry.collection,
                entry.record_id,
                retry_count,
                message,
                next_attempt_at
            );
            report.retried += 1;
        }
        Ok(())
    }
}

/// The record can vanish while its request is in flight.
fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::NotFound(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::{ManualClock, SharedClock};
    use crate::models::{
        AppointmentPayload, Collection, EmergencyEventPayload, Location, PatientPayload, Priority,
        Record, SyncAction,
    };
    use crate::sync::testing::ScriptedTransport;
    use crate::sync::SyncAck;
    use pretty_assertions::assert_eq;

    struct Harness {
        clock: ManualClock,
        store: LocalStore,
        monitor: NetworkMonitor,
        transport: Arc<ScriptedTransport>,
        dispatcher: SyncDispatcher,
    }

    async fn harness(transport: ScriptedTransport, online: bool) -> Harness {
        let clock = ManualClock::new(1_700_000_000_000);
        let shared: SharedClock = Arc::new(clock.clone());
        let store = LocalStore::open_in_memory(shared).await.unwrap();
        let monitor = NetworkMonitor::new(online);
        let transport = Arc::new(transport);
        let dispatcher = SyncDispatcher::new(
            store.clone(),
            transport.clone(),
            monitor.clone(),
            DispatcherConfig::default(),
        );
        Harness {
            clock,
            store,
            monitor,
            transport,
            dispatcher,
        }
    }

    async fn add_patient(store: &LocalStore, name: &str) -> Record {
        let record = Record::from_payload(&PatientPayload::new(name), store.now_ms()).unwrap();
        store
            .record_mutation(&record, SyncAction::CreatePatient)
            .await
            .unwrap();
        record
    }

    async fn raise_sos(store: &LocalStore) -> (Record, QueueId) {
        let payload = EmergencyEventPayload::new("patient-1", Location::Unknown, store.now_ms());
        let record = Record::from_payload(&payload, store.now_ms()).unwrap();
        let (_, queue_id) = store
            .record_mutation(&record, SyncAction::EmergencySos)
            .await
            .unwrap();
        (record, queue_id)
    }

    async fn status(store: &LocalStore, collection: Collection, record: &Record) -> Record {
        store.get(collection, &record.id).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_records_sync_after_one_drain() {
        let h = harness(ScriptedTransport::accepting(), false).await;
        let first = add_patient(&h.store, "Anita").await;
        let second = add_patient(&h.store, "Bhavesh").await;

        assert_eq!(h.dispatcher.drain().await.unwrap(), DrainOutcome::Offline);
        assert_eq!(h.transport.call_count(), 0);

        h.monitor.set_online(true);
        let outcome = h.dispatcher.drain().await.unwrap();
        let report = outcome.report().copied().unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.synced, 2);

        for record in [&first, &second] {
            let stored = status(&h.store, Collection::Patient, record).await;
            assert_eq!(stored.sync_status, SyncStatus::Synced);
            assert_eq!(stored.server_id, Some(format!("srv-{}", record.id)));
        }
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
        assert_eq!(
            h.store.sync_meta().await.unwrap().last_sync_at,
            Some(h.store.now_ms())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_triggers_do_not_start_a_second_drain() {
        let h = harness(
            ScriptedTransport::accepting().with_delay(Duration::from_millis(50)),
            true,
        )
        .await;
        for name in ["A", "B", "C"] {
            add_patient(&h.store, name).await;
        }

        let running = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.drain().await })
        };
        while h.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        for _ in 0..10 {
            h.monitor.set_online(false);
            h.monitor.set_online(true);
            assert_eq!(
                h.dispatcher.drain().await.unwrap(),
                DrainOutcome::AlreadyDraining
            );
        }

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.report().unwrap().synced, 3);
        assert_eq!(h.transport.max_concurrent(), 1);
        assert_eq!(h.transport.call_count(), 3);
        assert!(!h.dispatcher.is_draining());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn three_transient_failures_become_terminal() {
        let h = harness(
            ScriptedTransport::failing(SyncError::Transient("HTTP 503".to_string())),
            true,
        )
        .await;
        let record = add_patient(&h.store, "Chitra").await;

        let first = h.dispatcher.drain().await.unwrap();
        assert_eq!(first.report().unwrap().retried, 1);

        // Still backing off: nothing eligible.
        h.dispatcher.drain().await.unwrap();
        assert_eq!(h.transport.call_count(), 1);

        h.clock.advance(Duration::from_secs(2));
        h.dispatcher.drain().await.unwrap();
        assert_eq!(h.transport.call_count(), 2);

        h.clock.advance(Duration::from_secs(4));
        let third = h.dispatcher.drain().await.unwrap();
        assert_eq!(third.report().unwrap().failed, 1);

        h.clock.advance(Duration::from_secs(3600));
        h.dispatcher.drain().await.unwrap();
        assert_eq!(h.transport.call_count(), 3);

        let stored = status(&h.store, Collection::Patient, &record).await;
        assert_eq!(stored.sync_status, SyncStatus::Failed);
        assert!(stored.last_error.unwrap().contains("gave up after 3 attempts"));
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
        assert_eq!(
            h.store.sync_meta().await.unwrap().last_sync_error.as_deref(),
            Some("HTTP 503")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn high_priority_entry_jumps_ten_normal_entries() {
        let h = harness(ScriptedTransport::accepting(), true).await;
        for index in 0..10 {
            add_patient(&h.store, &format!("Patient {index}")).await;
        }
        let (sos, _) = raise_sos(&h.store).await;

        h.dispatcher.drain().await.unwrap();

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 11);
        assert_eq!(calls[0].action, SyncAction::EmergencySos);
        assert_eq!(calls[0].record.id, sos.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_entry_for_synced_record_makes_no_call() {
        let h = harness(ScriptedTransport::accepting(), true).await;
        let record = add_patient(&h.store, "Deepa").await;
        h.store.mark_synced(&record.id, Some("srv-1")).await.unwrap();

        let outcome = h.dispatcher.drain().await.unwrap();
        assert_eq!(outcome.report().unwrap().dropped, 1);
        assert_eq!(h.transport.call_count(), 0);
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entry_for_missing_record_is_dropped() {
        let h = harness(ScriptedTransport::accepting(), true).await;
        h.store
            .enqueue(
                SyncAction::BookAppointment,
                crate::models::RecordId::new(),
                Priority::Normal,
            )
            .await
            .unwrap();

        let outcome = h.dispatcher.drain().await.unwrap();
        assert_eq!(outcome.report().unwrap().dropped, 1);
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejection_is_terminal_immediately() {
        let h = harness(
            ScriptedTransport::failing(SyncError::Rejected("doctor unavailable (409)".to_string())),
            true,
        )
        .await;
        let appointment = Record::from_payload(
            &AppointmentPayload::new("p-1", "d-1", "2024-06-01T10:00:00Z"),
            h.store.now_ms(),
        )
        .unwrap();
        h.store
            .record_mutation(&appointment, SyncAction::BookAppointment)
            .await
            .unwrap();

        let outcome = h.dispatcher.drain().await.unwrap();
        assert_eq!(outcome.report().unwrap().failed, 1);
        assert_eq!(h.transport.call_count(), 1);

        let stored = status(&h.store, Collection::Appointment, &appointment).await;
        assert_eq!(stored.sync_status, SyncStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("doctor unavailable (409)"));
        assert_eq!(h.store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emergency_entries_retry_past_the_ceiling_with_capped_backoff() {
        let h = harness(
            ScriptedTransport::failing(SyncError::Transient("timeout".to_string())),
            true,
        )
        .await;
        let (sos, queue_id) = raise_sos(&h.store).await;

        for _ in 0..6 {
            h.dispatcher.drain().await.unwrap();
            let entry = h.store.entry(&queue_id).await.unwrap().unwrap();
            assert!(entry.next_attempt_at - h.store.now_ms() <= 30_000);
            h.clock.advance(Duration::from_secs(30));
        }

        assert_eq!(h.transport.call_count(), 6);
        let entry = h.store.entry(&queue_id).await.unwrap().unwrap();
        assert_eq!(entry.retry_count, 6);
        let stored = status(&h.store, Collection::EmergencyEvent, &sos).await;
        assert_eq!(stored.sync_status, SyncStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_is_synced_only_after_its_last_entry() {
        let h = harness(
            ScriptedTransport::accepting()
                .then(Ok(SyncAck {
                    server_id: Some("srv-create".to_string()),
                    status: None,
                }))
                .then(Ok(SyncAck {
                    server_id: Some("srv-update".to_string()),
                    status: None,
                })),
            true,
        )
        .await;
        let mut record = add_patient(&h.store, "Esha").await;
        record.payload["village"] = serde_json::json!("Rampur");
        h.store
            .record_mutation(&record, SyncAction::UpdatePatient)
            .await
            .unwrap();

        h.dispatcher.drain().await.unwrap();

        let calls = h.transport.calls();
        assert_eq!(
            calls.iter().map(|call| call.action).collect::<Vec<_>>(),
            vec![SyncAction::CreatePatient, SyncAction::UpdatePatient]
        );
        assert_ne!(calls[0].idempotency_key, calls[1].idempotency_key);
        let stored = status(&h.store, Collection::Patient, &record).await;
        assert_eq!(stored.sync_status, SyncStatus::Synced);
        assert_eq!(stored.server_id.as_deref(), Some("srv-update"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_waits_behind_create_that_is_backing_off() {
        let h = harness(
            ScriptedTransport::accepting().then(Err(SyncError::Transient("HTTP 503".to_string()))),
            true,
        )
        .await;
        let mut record = add_patient(&h.store, "Gauri").await;

        let first = h.dispatcher.drain().await.unwrap();
        assert_eq!(first.report().unwrap().retried, 1);

        h.clock.advance(Duration::from_millis(10));
        record.payload["village"] = serde_json::json!("Sitapur");
        h.store
            .record_mutation(&record, SyncAction::UpdatePatient)
            .await
            .unwrap();

        // The create is still backing off, so its update is held too.
        let held = h.dispatcher.drain().await.unwrap();
        assert_eq!(held.report().unwrap().dispatched, 0);
        assert_eq!(h.transport.call_count(), 1);
        assert_eq!(h.store.queue_len().await.unwrap(), 2);

        h.clock.advance(Duration::from_secs(2));
        let resumed = h.dispatcher.drain().await.unwrap();
        assert_eq!(resumed.report().unwrap().synced, 2);

        let calls = h.transport.calls();
        assert_eq!(
            calls.iter().map(|call| call.action).collect::<Vec<_>>(),
            vec![
                SyncAction::CreatePatient,
                SyncAction::CreatePatient,
                SyncAction::UpdatePatient
            ]
        );
        assert_eq!(
            status(&h.store, Collection::Patient, &record)
                .await
                .sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entry_removed_while_in_flight_leaves_record_status_alone() {
        let h = harness(
            ScriptedTransport::accepting().with_delay(Duration::from_millis(40)),
            true,
        )
        .await;
        let record = add_patient(&h.store, "Hema").await;

        let running = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.drain().await })
        };
        while h.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        h.store.remove_for_record(&record.id).await.unwrap();
        h.store.mark_failed(&record.id, "withdrawn").await.unwrap();

        running.await.unwrap().unwrap();
        let stored = status(&h.store, Collection::Patient, &record).await;
        assert_eq!(stored.sync_status, SyncStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("withdrawn"));
        assert_eq!(stored.server_id, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn urgent_dispatch_sends_only_that_entry() {
        let h = harness(ScriptedTransport::accepting(), true).await;
        let waiting = add_patient(&h.store, "Farah").await;
        let (sos, queue_id) = raise_sos(&h.store).await;

        let outcome = h.dispatcher.dispatch_urgent(&queue_id).await.unwrap();
        assert_eq!(outcome.report().unwrap().synced, 1);

        let calls = h.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].record.id, sos.id);
        assert_eq!(
            status(&h.store, Collection::Patient, &waiting)
                .await
                .sync_status,
            SyncStatus::Pending
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn urgent_dispatch_during_drain_is_picked_up_by_running_drain() {
        let h = harness(
            ScriptedTransport::accepting().with_delay(Duration::from_millis(30)),
            true,
        )
        .await;
        for name in ["G", "H", "I", "J"] {
            add_patient(&h.store, name).await;
        }

        let running = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.drain().await })
        };
        while h.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let (sos, queue_id) = raise_sos(&h.store).await;
        assert_eq!(
            h.dispatcher.dispatch_urgent(&queue_id).await.unwrap(),
            DrainOutcome::AlreadyDraining
        );

        running.await.unwrap().unwrap();
        assert_eq!(h.transport.max_concurrent(), 1);
        assert_eq!(h.transport.call_count(), 5);
        // Sent before the patients still waiting behind it.
        let sos_position = h
            .transport
            .calls()
            .iter()
            .position(|call| call.record.id == sos.id)
            .unwrap();
        assert!(sos_position < 4);
        assert_eq!(
            status(&h.store, Collection::EmergencyEvent, &sos)
                .await
                .sync_status,
            SyncStatus::Synced
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn going_offline_mid_drain_stops_processing() {
        let h = harness(
            ScriptedTransport::accepting().with_delay(Duration::from_millis(40)),
            true,
        )
        .await;
        let first = add_patient(&h.store, "K").await;
        let second = add_patient(&h.store, "L").await;

        let running = {
            let dispatcher = h.dispatcher.clone();
            tokio::spawn(async move { dispatcher.drain().await })
        };
        while h.transport.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        h.monitor.set_online(false);

        assert_eq!(running.await.unwrap().unwrap(), DrainOutcome::Offline);
        assert_eq!(h.transport.call_count(), 1);

        // The in-flight request still completes; the next entry waits.
        assert_eq!(
            status(&h.store, Collection::Patient, &first).await.sync_status,
            SyncStatus::Synced
        );
        assert_eq!(
            status(&h.store, Collection::Patient, &second).await.sync_status,
            SyncStatus::Pending
        );
        assert_eq!(h.store.queue_len().await.unwrap(), 1);
        assert_eq!(
            h.store.sync_meta().await.unwrap().last_sync_error.as_deref(),
            Some("network went offline during sync")
        );
    }
}
