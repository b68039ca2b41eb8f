//! Record envelope shared by every collection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::payloads::RecordPayload;

/// A unique identifier for a record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Independent groups of records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Patient,
    Appointment,
    Prescription,
    HealthRecord,
    VoiceCommandLog,
    EmergencyEvent,
}

impl Collection {
    pub const ALL: [Self; 6] = [
        Self::Patient,
        Self::Appointment,
        Self::Prescription,
        Self::HealthRecord,
        Self::VoiceCommandLog,
        Self::EmergencyEvent,
    ];

    /// Stable name used in storage and on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Appointment => "appointment",
            Self::Prescription => "prescription",
            Self::HealthRecord => "healthRecord",
            Self::VoiceCommandLog => "voiceCommandLog",
            Self::EmergencyEvent => "emergencyEvent",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection '{s}'")))
    }
}

/// Reconciliation state of a record against the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Written locally, not yet confirmed by the server
    #[default]
    Pending,
    /// Confirmed by the server
    Synced,
    /// Terminal failure; needs manual remediation
    Failed,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown sync status '{other}'"))),
        }
    }
}

/// A domain record persisted in the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Client-generated identifier
    pub id: RecordId,
    /// Collection the record belongs to
    pub collection: Collection,
    /// Owning patient, maintained as a secondary index
    pub owner_id: Option<String>,
    /// Index day (`YYYY-MM-DD`), maintained as a secondary index
    pub record_date: Option<String>,
    /// Collection-specific fields
    pub payload: serde_json::Value,
    /// Sync state
    pub sync_status: SyncStatus,
    /// Identifier assigned by the server once synced
    pub server_id: Option<String>,
    /// Last sync failure, if any
    pub last_error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local modification timestamp (Unix ms)
    pub updated_at: i64,
}

impl Record {
    /// Build a fresh pending record from a typed payload.
    pub fn from_payload<P: RecordPayload>(payload: &P, now_ms: i64) -> Result<Self> {
        Self::from_payload_with_id(RecordId::new(), payload, now_ms)
    }

    /// Build a pending record with a known id (used for updates).
    pub fn from_payload_with_id<P: RecordPayload>(
        id: RecordId,
        payload: &P,
        now_ms: i64,
    ) -> Result<Self> {
        payload.validate()?;
        Ok(Self {
            id,
            collection: P::COLLECTION,
            owner_id: payload.owner_id(),
            record_date: payload.record_date(),
            payload: serde_json::to_value(payload)?,
            sync_status: SyncStatus::Pending,
            server_id: None,
            last_error: None,
            created_at: now_ms,
            updated_at: now_ms,
        })
    }

    /// Decode the payload into its typed form.
    pub fn decode<P: RecordPayload>(&self) -> Result<P> {
        if self.collection != P::COLLECTION {
            return Err(Error::InvalidInput(format!(
                "record {} belongs to {}, not {}",
                self.id,
                self.collection,
                P::COLLECTION
            )));
        }
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}
