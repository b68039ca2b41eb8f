//! The offline engine: one object the UI layer talks to.
//!
//! Every action writes locally and enqueues its sync entry in one
//! transaction, then returns without waiting on the network.

use std::sync::Arc;

use crate::clock::{SharedClock, SystemClock};
use crate::config::SyncSettings;
use crate::db::RecordFilter;
use crate::emergency::{EmergencyService, Geolocator, SosReceipt, SosRequest};
use crate::models::{
    AppointmentPayload, AppointmentStatus, Collection, EmergencyEventPayload, EmergencyStatus,
    HealthRecordPayload, PatientPayload, PrescriptionPayload, QueueId, Record, RecordId,
    RecordPayload, SyncAction, SyncStatus, SyncSummary, VoiceCommandLogPayload,
};
use crate::network::{spawn_poller, HttpProbe, NetworkMonitor};
use crate::services::LocalStore;
use crate::sync::{spawn_sync_loop, DrainOutcome, SyncDispatcher, SyncLoopHandle, SyncTransport};
use crate::{Error, Result};

pub struct OfflineEngine {
    settings: SyncSettings,
    store: LocalStore,
    monitor: NetworkMonitor,
    dispatcher: SyncDispatcher,
    emergency: EmergencyService,
}

impl OfflineEngine {
    /// Open the store (falling back to memory if it is unusable) and wire up
    /// the monitor, dispatcher and emergency service.
    ///
    /// The monitor starts offline; the host reports connectivity through
    /// [`NetworkMonitor::set_online`] or the background poller.
    pub async fn initialize(
        settings: SyncSettings,
        transport: Arc<dyn SyncTransport>,
        geolocator: Arc<dyn Geolocator>,
    ) -> Result<Self> {
        Self::initialize_with_clock(settings, transport, geolocator, Arc::new(SystemClock)).await
    }

    pub async fn initialize_with_clock(
        settings: SyncSettings,
        transport: Arc<dyn SyncTransport>,
        geolocator: Arc<dyn Geolocator>,
        clock: SharedClock,
    ) -> Result<Self> {
        settings.validate()?;

        let store = match &settings.db_path {
            Some(path) => LocalStore::open_path(path, clock).await?,
            None => LocalStore::open_in_memory(clock).await?,
        };
        let monitor = NetworkMonitor::new(false);
        let dispatcher = SyncDispatcher::new(
            store.clone(),
            transport,
            monitor.clone(),
            settings.dispatcher_config(),
        );
        let emergency = EmergencyService::new(
            store.clone(),
            dispatcher.clone(),
            geolocator,
            settings.geolocation_timeout(),
        );

        tracing::info!(
            "Offline engine ready (store: {}, degraded: {})",
            store
                .path()
                .map_or_else(|| "in-memory".to_string(), |path| path.display().to_string()),
            store.is_degraded()
        );

        Ok(Self {
            settings,
            store,
            monitor,
            dispatcher,
            emergency,
        })
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub const fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    pub async fn add_patient(&self, patient: PatientPayload) -> Result<RecordId> {
        self.create(&patient, SyncAction::CreatePatient).await
    }

    pub async fn update_patient(&self, id: &RecordId, patient: PatientPayload) -> Result<()> {
        self.replace(id, &patient, SyncAction::UpdatePatient).await
    }

    pub async fn book_appointment(&self, appointment: AppointmentPayload) -> Result<RecordId> {
        self.create(&appointment, SyncAction::BookAppointment).await
    }

    pub async fn update_appointment_status(
        &self,
        id: &RecordId,
        status: AppointmentStatus,
    ) -> Result<()> {
        let existing = self.require(Collection::Appointment, id).await?;
        let mut appointment: AppointmentPayload = existing.decode()?;
        appointment.status = status;
        self.replace(id, &appointment, SyncAction::UpdateAppointment)
            .await
    }

    pub async fn save_prescription(&self, prescription: PrescriptionPayload) -> Result<RecordId> {
        self.create(&prescription, SyncAction::SavePrescription)
            .await
    }

    pub async fn add_health_record(&self, record: HealthRecordPayload) -> Result<RecordId> {
        self.create(&record, SyncAction::AddHealthRecord).await
    }

    pub async fn log_voice_command(&self, entry: VoiceCommandLogPayload) -> Result<RecordId> {
        self.create(&entry, SyncAction::LogVoiceCommand).await
    }

    /// See [`EmergencyService::raise_sos`].
    pub async fn raise_sos(&self, request: SosRequest) -> Result<SosReceipt> {
        self.emergency.raise_sos(request).await
    }

    /// See [`EmergencyService::cancel_sos`].
    pub async fn cancel_sos(&self, record_id: &RecordId) -> Result<bool> {
        self.emergency.cancel_sos(record_id).await
    }

    /// Put a terminally failed record back in the queue.
    pub async fn retry_failed(&self, collection: Collection, id: &RecordId) -> Result<QueueId> {
        let mut record = self.require(collection, id).await?;
        if record.sync_status != SyncStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "{collection} {id} is {}, not failed",
                record.sync_status
            )));
        }
        if collection == Collection::EmergencyEvent {
            let alert: EmergencyEventPayload = record.decode()?;
            if alert.status == EmergencyStatus::Cancelled {
                return Err(Error::InvalidInput(format!(
                    "emergency event {id} was cancelled"
                )));
            }
        }

        let action = retry_action(collection, record.server_id.is_some());
        record.updated_at = self.store.now_ms();
        let (_, queue_id) = self.store.record_mutation(&record, action).await?;
        tracing::info!("Re-queued failed {} {} as {}", collection, id, action);
        self.drain_in_background();
        Ok(queue_id)
    }

    /// Remove a record locally together with anything still queued for it.
    pub async fn delete_record(&self, collection: Collection, id: &RecordId) -> Result<bool> {
        self.store.delete(collection, id).await
    }

    /// Drain the queue now.
    pub async fn request_sync(&self) -> Result<DrainOutcome> {
        self.dispatcher.drain().await
    }

    /// Status counts from local tables only.
    pub async fn summary(&self) -> Result<SyncSummary> {
        self.store.summary().await
    }

    pub async fn get(&self, collection: Collection, id: &RecordId) -> Result<Option<Record>> {
        self.store.get(collection, id).await
    }

    pub async fn list(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<Record>> {
        self.store.list(collection, filter).await
    }

    /// Spawn the sync loop, plus the connectivity poller when a remote
    /// service is configured.
    pub fn start_background_sync(&self) -> Result<SyncLoopHandle> {
        let handle = spawn_sync_loop(
            self.dispatcher.clone(),
            self.monitor.clone(),
            self.settings.sync_interval(),
        );

        match self.settings.health_url() {
            Some(url) => {
                let probe = HttpProbe::new(url, self.settings.request_timeout())?;
                let poller = spawn_poller(
                    self.monitor.clone(),
                    Arc::new(probe),
                    self.settings.poll_interval(),
                );
                Ok(handle.with_companion(poller))
            }
            None => Ok(handle),
        }
    }

    async fn require(&self, collection: Collection, id: &RecordId) -> Result<Record> {
        self.store
            .get(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{collection} {id}")))
    }

    async fn create<P: RecordPayload>(&self, payload: &P, action: SyncAction) -> Result<RecordId> {
        let record = Record::from_payload(payload, self.store.now_ms())?;
        self.submit(&record, action).await
    }

    async fn replace<P: RecordPayload>(
        &self,
        id: &RecordId,
        payload: &P,
        action: SyncAction,
    ) -> Result<()> {
        let existing = self.require(P::COLLECTION, id).await?;
        let mut record = Record::from_payload_with_id(*id, payload, self.store.now_ms())?;
        record.created_at = existing.created_at;
        self.submit(&record, action).await?;
        Ok(())
    }

    async fn submit(&self, record: &Record, action: SyncAction) -> Result<RecordId> {
        let (record_id, queue_id) = self.store.record_mutation(record, action).await?;
        tracing::debug!(
            "Stored {} {} and queued {} as {}",
            record.collection,
            record_id,
            action,
            queue_id
        );
        self.drain_in_background();
        Ok(record_id)
    }

    fn drain_in_background(&self) {
        if !self.settings.drain_on_write || !self.monitor.is_online() {
            return;
        }
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(error) = dispatcher.drain().await {
                tracing::error!("Background sync drain failed: {}", error);
            }
        });
    }
}

/// Action used to resend a failed record: an update once the server knows
/// the record, otherwise the original create.
const fn retry_action(collection: Collection, known_to_server: bool) -> SyncAction {
    match collection {
        Collection::Patient if known_to_server => SyncAction::UpdatePatient,
        Collection::Patient => SyncAction::CreatePatient,
        Collection::Appointment if known_to_server => SyncAction::UpdateAppointment,
        Collection::Appointment => SyncAction::BookAppointment,
        Collection::Prescription => SyncAction::SavePrescription,
        Collection::HealthRecord => SyncAction::AddHealthRecord,
        Collection::VoiceCommandLog => SyncAction::LogVoiceCommand,
        Collection::EmergencyEvent => SyncAction::EmergencySos,
    }
}
