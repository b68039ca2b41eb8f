//! SOS alerts: capture, persist, and push ahead of everything else.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{
    Collection, EmergencyEventPayload, EmergencyStatus, Location, QueueId, Record, RecordId,
    SyncAction,
};
use crate::services::LocalStore;
use crate::sync::{DrainOutcome, SyncDispatcher};
use crate::{Error, Result};

/// Reason recorded on a cancelled alert.
pub const CANCELLED_REASON: &str = "cancelled by user";

/// Single-shot position lookup.
#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn locate(&self) -> Result<Location>;
}

/// Always reports the same position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedGeolocator(pub Location);

#[async_trait]
impl Geolocator for FixedGeolocator {
    async fn locate(&self) -> Result<Location> {
        Ok(self.0)
    }
}

/// For hosts without a positioning source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeolocator;

#[async_trait]
impl Geolocator for NoGeolocator {
    async fn locate(&self) -> Result<Location> {
        Ok(Location::Unknown)
    }
}

/// What the caller supplies when raising an alert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SosRequest {
    pub patient_id: String,
    pub message: Option<String>,
}

impl SosRequest {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Result of raising an alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SosReceipt {
    pub record_id: RecordId,
    pub queue_id: QueueId,
    pub location: Location,
    /// Outcome of the immediate dispatch, if one was attempted (online only).
    pub dispatch: Option<DrainOutcome>,
}

impl SosReceipt {
    /// Whether the server already has the alert.
    pub fn delivered(&self) -> bool {
        matches!(
            self.dispatch,
            Some(DrainOutcome::Completed(report)) if report.synced > 0
        )
    }
}

#[derive(Clone)]
pub struct EmergencyService {
    store: LocalStore,
    dispatcher: SyncDispatcher,
    geolocator: Arc<dyn Geolocator>,
    geolocation_timeout: Duration,
}

impl EmergencyService {
    pub fn new(
        store: LocalStore,
        dispatcher: SyncDispatcher,
        geolocator: Arc<dyn Geolocator>,
        geolocation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            geolocator,
            geolocation_timeout,
        }
    }

    async fn locate(&self) -> Location {
        match tokio::time::timeout(self.geolocation_timeout, self.geolocator.locate()).await {
            Ok(Ok(location)) => location,
            Ok(Err(error)) => {
                tracing::warn!("Geolocation failed, raising SOS without a position: {}", error);
                Location::Unknown
            }
            Err(_) => {
                tracing::warn!(
                    "Geolocation timed out after {:?}, raising SOS without a position",
                    self.geolocation_timeout
                );
                Location::Unknown
            }
        }
    }

    /// Persist and enqueue an alert at high priority, then try to deliver it
    /// right away when online.
    pub async fn raise_sos(&self, request: SosRequest) -> Result<SosReceipt> {
        let location = self.locate().await;

        let payload = EmergencyEventPayload {
            message: request.message,
            ..EmergencyEventPayload::new(request.patient_id, location, self.store.now_ms())
        };
        let record = Record::from_payload(&payload, self.store.now_ms())?;
        let (record_id, queue_id) = self
            .store
            .record_mutation(&record, SyncAction::EmergencySos)
            .await?;
        tracing::warn!("SOS raised for patient {} ({})", payload.patient_id, record_id);

        let dispatch = if self.dispatcher.monitor().is_online() {
            Some(self.dispatcher.dispatch_urgent(&queue_id).await?)
        } else {
            tracing::info!("Offline: SOS {} queued at high priority", record_id);
            None
        };

        Ok(SosReceipt {
            record_id,
            queue_id,
            location,
            dispatch,
        })
    }

    /// Withdraw an alert that has not been delivered yet.
    ///
    /// Returns `false` if it was already cancelled. An alert the server
    /// already holds cannot be withdrawn.
    pub async fn cancel_sos(&self, record_id: &RecordId) -> Result<bool> {
        let mut record = self
            .store
            .get(Collection::EmergencyEvent, record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("emergency event {record_id}")))?;

        let mut payload: EmergencyEventPayload = record.decode()?;
        if payload.status == EmergencyStatus::Cancelled {
            return Ok(false);
        }

        payload.status = EmergencyStatus::Cancelled;
        record.payload = serde_json::to_value(&payload)?;
        record.updated_at = self.store.now_ms();
        let Some(removed) = self.store.withdraw(&record, CANCELLED_REASON).await? else {
            return Err(Error::InvalidInput(format!(
                "SOS {record_id} was already delivered"
            )));
        };

        tracing::info!(
            "SOS {} cancelled ({} pending entr{} removed)",
            record_id,
            removed,
            if removed == 1 { "y" } else { "ies" }
        );
        Ok(true)
    }
}
