//! Typed payloads for each record collection

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{day_key, is_day_key};

use super::record::Collection;

/// A collection-specific record body.
///
/// Implementors declare which collection they belong to and which fields feed
/// the owner and date secondary indexes.
pub trait RecordPayload: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    /// Owning patient for the by-owner index
    fn owner_id(&self) -> Option<String> {
        None
    }

    /// Day key (`YYYY-MM-DD`) for the by-date index
    fn record_date(&self) -> Option<String> {
        None
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidInput(format!("{field} is required")))
    } else {
        Ok(())
    }
}

fn require_day(value: &str, field: &str) -> Result<()> {
    if is_day_key(value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{field} must be a YYYY-MM-DD date, got '{value}'"
        )))
    }
}

/// Leading `YYYY-MM-DD` of an RFC 3339 timestamp or plain date.
fn leading_day(value: &str) -> Option<String> {
    let day = value.get(..10)?;
    is_day_key(day).then(|| day.to_string())
}

/// Patient registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPayload {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub village: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

impl PatientPayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: None,
            gender: None,
            phone: None,
            village: None,
            preferred_language: None,
        }
    }
}

impl RecordPayload for PatientPayload {
    const COLLECTION: Collection = Collection::Patient;

    fn validate(&self) -> Result<()> {
        require(&self.name, "patient name")
    }
}

/// Lifecycle of a booked consultation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consultation booking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPayload {
    pub patient_id: String,
    pub doctor_id: String,
    /// RFC 3339 timestamp of the slot
    pub scheduled_at: String,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub consultation_mode: Option<String>,
}

impl AppointmentPayload {
    pub fn new(
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        scheduled_at: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            scheduled_at: scheduled_at.into(),
            status: AppointmentStatus::Scheduled,
            reason: None,
            consultation_mode: None,
        }
    }
}

impl RecordPayload for AppointmentPayload {
    const COLLECTION: Collection = Collection::Appointment;

    fn owner_id(&self) -> Option<String> {
        Some(self.patient_id.clone())
    }

    fn record_date(&self) -> Option<String> {
        leading_day(&self.scheduled_at)
    }

    fn validate(&self) -> Result<()> {
        require(&self.patient_id, "patient id")?;
        require(&self.doctor_id, "doctor id")?;
        if leading_day(&self.scheduled_at).is_none() {
            return Err(Error::InvalidInput(format!(
                "scheduled time must start with a YYYY-MM-DD date, got '{}'",
                self.scheduled_at
            )));
        }
        Ok(())
    }
}

/// One prescribed medicine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(default)]
    pub duration_days: Option<u32>,
}

/// Prescription issued by a doctor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionPayload {
    pub patient_id: String,
    pub doctor_id: String,
    /// `YYYY-MM-DD`
    pub issued_on: String,
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub pharmacy_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordPayload for PrescriptionPayload {
    const COLLECTION: Collection = Collection::Prescription;

    fn owner_id(&self) -> Option<String> {
        Some(self.patient_id.clone())
    }

    fn record_date(&self) -> Option<String> {
        Some(self.issued_on.clone())
    }

    fn validate(&self) -> Result<()> {
        require(&self.patient_id, "patient id")?;
        require(&self.doctor_id, "doctor id")?;
        require_day(&self.issued_on, "issue date")?;
        if self.medications.is_empty() {
            return Err(Error::InvalidInput(
                "prescription needs at least one medication".to_string(),
            ));
        }
        for medication in &self.medications {
            require(&medication.name, "medication name")?;
        }
        Ok(())
    }
}

/// Vitals, lab results and other clinical notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecordPayload {
    pub patient_id: String,
    /// e.g. `vitals`, `lab`, `diagnosis`
    pub record_type: String,
    /// `YYYY-MM-DD`
    pub recorded_on: String,
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl RecordPayload for HealthRecordPayload {
    const COLLECTION: Collection = Collection::HealthRecord;

    fn owner_id(&self) -> Option<String> {
        Some(self.patient_id.clone())
    }

    fn record_date(&self) -> Option<String> {
        Some(self.recorded_on.clone())
    }

    fn validate(&self) -> Result<()> {
        require(&self.patient_id, "patient id")?;
        require(&self.record_type, "record type")?;
        require_day(&self.recorded_on, "record date")
    }
}

/// Transcript of a voice command, kept for audit and offline replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCommandLogPayload {
    #[serde(default)]
    pub patient_id: Option<String>,
    pub transcript: String,
    pub language: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Unix ms
    pub logged_at: i64,
}

impl RecordPayload for VoiceCommandLogPayload {
    const COLLECTION: Collection = Collection::VoiceCommandLog;

    fn owner_id(&self) -> Option<String> {
        self.patient_id.clone()
    }

    fn record_date(&self) -> Option<String> {
        Some(day_key(self.logged_at))
    }

    fn validate(&self) -> Result<()> {
        require(&self.transcript, "transcript")?;
        require(&self.language, "language")
    }
}

/// Where an emergency was raised
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Location {
    #[serde(rename_all = "camelCase")]
    Known {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        accuracy_m: Option<f64>,
    },
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    #[default]
    Raised,
    Cancelled,
}

impl fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raised => "raised",
            Self::Cancelled => "cancelled",
        })
    }
}

/// SOS alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyEventPayload {
    pub patient_id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub status: EmergencyStatus,
    /// Unix ms
    pub raised_at: i64,
}

impl EmergencyEventPayload {
    pub fn new(patient_id: impl Into<String>, location: Location, raised_at: i64) -> Self {
        Self {
            patient_id: patient_id.into(),
            message: None,
            location,
            status: EmergencyStatus::Raised,
            raised_at,
        }
    }
}

impl RecordPayload for EmergencyEventPayload {
    const COLLECTION: Collection = Collection::EmergencyEvent;

    fn owner_id(&self) -> Option<String> {
        Some(self.patient_id.clone())
    }

    fn record_date(&self) -> Option<String> {
        Some(day_key(self.raised_at))
    }

    fn validate(&self) -> Result<()> {
        require(&self.patient_id, "patient id")
    }
}
