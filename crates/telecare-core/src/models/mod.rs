//! Data models for Telecare

mod payloads;
mod queue;
mod record;

pub use payloads::{
    AppointmentPayload, AppointmentStatus, EmergencyEventPayload, EmergencyStatus,
    HealthRecordPayload, Location, Medication, PatientPayload, PrescriptionPayload,
    RecordPayload, VoiceCommandLogPayload,
};
pub use queue::{Priority, QueueEntry, QueueId, SyncAction, SyncSummary};
pub use record::{Collection, Record, RecordId, SyncStatus};
