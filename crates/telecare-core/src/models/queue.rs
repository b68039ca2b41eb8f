//! Sync queue entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::record::{Collection, RecordId};

/// Queue entry identifier.
///
/// UUID v7 carries a millisecond timestamp followed by random bits, so two
/// entries enqueued in the same millisecond still order deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(Uuid);

impl QueueId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The mutation a queue entry reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    CreatePatient,
    UpdatePatient,
    BookAppointment,
    UpdateAppointment,
    SavePrescription,
    AddHealthRecord,
    LogVoiceCommand,
    EmergencySos,
}

impl SyncAction {
    const ALL: [Self; 8] = [
        Self::CreatePatient,
        Self::UpdatePatient,
        Self::BookAppointment,
        Self::UpdateAppointment,
        Self::SavePrescription,
        Self::AddHealthRecord,
        Self::LogVoiceCommand,
        Self::EmergencySos,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePatient => "create-patient",
            Self::UpdatePatient => "update-patient",
            Self::BookAppointment => "book-appointment",
            Self::UpdateAppointment => "update-appointment",
            Self::SavePrescription => "save-prescription",
            Self::AddHealthRecord => "add-health-record",
            Self::LogVoiceCommand => "log-voice-command",
            Self::EmergencySos => "emergency-sos",
        }
    }

    /// Collection of the record this action reconciles
    pub const fn collection(self) -> Collection {
        match self {
            Self::CreatePatient | Self::UpdatePatient => Collection::Patient,
            Self::BookAppointment | Self::UpdateAppointment => Collection::Appointment,
            Self::SavePrescription => Collection::Prescription,
            Self::AddHealthRecord => Collection::HealthRecord,
            Self::LogVoiceCommand => Collection::VoiceCommandLog,
            Self::EmergencySos => Collection::EmergencyEvent,
        }
    }

    /// Only emergency alerts jump the queue.
    pub const fn default_priority(self) -> Priority {
        match self {
            Self::EmergencySos => Priority::High,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("unknown sync action '{s}'")))
    }
}

/// Dequeue priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

impl Priority {
    /// Sort rank stored in the queue table; higher drains first.
    pub const fn rank(self) -> i64 {
        match self {
            Self::High => 1,
            Self::Normal => 0,
        }
    }

    pub const fn from_rank(rank: i64) -> Self {
        if rank > 0 {
            Self::High
        } else {
            Self::Normal
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Normal => f.write_str("normal"),
        }
    }
}

/// A pending mutation awaiting dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub queue_id: QueueId,
    pub action: SyncAction,
    pub collection: Collection,
    pub record_id: RecordId,
    pub priority: Priority,
    pub retry_count: u32,
    /// Unix ms
    pub enqueued_at: i64,
    /// Earliest dispatch time after backoff (Unix ms)
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(action: SyncAction, record_id: RecordId, priority: Priority, now_ms: i64) -> Self {
        Self {
            queue_id: QueueId::new(),
            action,
            collection: action.collection(),
            record_id,
            priority,
            retry_count: 0,
            enqueued_at: now_ms,
            next_attempt_at: now_ms,
            last_error: None,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == Priority::High
    }

    /// Token the server can use to collapse resubmissions of this entry.
    pub fn idempotency_key(&self) -> String {
        self.queue_id.as_str()
    }
}

/// Aggregate counts for status display, read from local tables only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Records awaiting confirmation
    pub pending: u64,
    /// Records needing manual remediation
    pub failed: u64,
    /// All records
    pub total: u64,
    /// Active queue entries
    pub queued: u64,
    /// Whether the store is running on the in-memory fallback
    pub degraded: bool,
    /// Last drain that reached the server (Unix ms)
    pub last_sync_at: Option<i64>,
}
