use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use telecare_core::emergency::{Geolocator, NoGeolocator};
use telecare_core::models::{
    AppointmentPayload, EmergencyEventPayload, HealthRecordPayload, PatientPayload,
    PrescriptionPayload, VoiceCommandLogPayload,
};
use telecare_core::network::{ConnectivityProbe, HttpProbe};
use telecare_core::sync::{HttpSyncTransport, SyncTransport, UnconfiguredTransport};
use telecare_core::util::compact_text;
use telecare_core::{Collection, OfflineEngine, Record, RecordId, SyncSettings};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub collection: String,
    pub owner_id: Option<String>,
    pub record_date: Option<String>,
    pub summary: String,
    pub sync_status: String,
    pub server_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
    pub payload: serde_json::Value,
}

/// Settings from the optional JSON file, then `TELECARE_*` variables, then
/// the command line.
pub fn resolve_settings(
    cli_db_path: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<SyncSettings, CliError> {
    let base = match config_path {
        Some(path) => SyncSettings::load_from_path(path)?,
        None => SyncSettings::default(),
    };
    let mut settings = base.with_env_overrides()?;

    let db_path = cli_db_path
        .or_else(|| settings.db_path.clone())
        .unwrap_or_else(default_db_path);
    settings.db_path = Some(db_path);
    // The process exits right after each command, so writes are pushed by
    // `telecare sync` rather than by detached background drains.
    settings.drain_on_write = false;
    Ok(settings)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("telecare")
        .join("telecare.db")
}

pub fn build_transport(settings: &SyncSettings) -> Result<Arc<dyn SyncTransport>, CliError> {
    match &settings.api_base_url {
        Some(base_url) => Ok(Arc::new(HttpSyncTransport::new(
            base_url.clone(),
            settings.api_token.clone(),
            settings.request_timeout(),
        )?)),
        None => Ok(Arc::new(UnconfiguredTransport)),
    }
}

pub async fn open_engine(settings: &SyncSettings) -> Result<OfflineEngine, CliError> {
    open_engine_with(settings, Arc::new(NoGeolocator)).await
}

pub async fn open_engine_with(
    settings: &SyncSettings,
    geolocator: Arc<dyn Geolocator>,
) -> Result<OfflineEngine, CliError> {
    let engine =
        OfflineEngine::initialize(settings.clone(), build_transport(settings)?, geolocator).await?;
    if engine.store().is_degraded() {
        eprintln!("Warning: local database unavailable, changes will not survive this run");
    }
    Ok(engine)
}

/// Probe the health endpoint once and report the result to the engine's
/// monitor. Stays offline when no service is configured.
pub async fn probe_connectivity(engine: &OfflineEngine) -> Result<bool, CliError> {
    let Some(url) = engine.settings().health_url() else {
        return Ok(false);
    };
    let probe = HttpProbe::new(url, engine.settings().request_timeout())?;
    let reachable = probe.is_reachable().await;
    engine.monitor().set_online(reachable);
    Ok(reachable)
}

pub fn parse_record_id(id: &str) -> Result<RecordId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CliError::EmptyRecordId);
    }
    trimmed
        .parse()
        .map_err(|_| CliError::InvalidRecordId(trimmed.to_string()))
}

pub fn normalize_name(parts: &[String]) -> String {
    compact_text(&parts.join(" "))
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let id = record.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let summary = truncate(&record_summary(record), 48);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let status = record.sync_status.as_str();

            match &record.last_error {
                Some(error) => format!(
                    "{short_id:<13}  {status:<7}  {summary:<48}  {relative_time:<10}  {}",
                    truncate(error, 60)
                ),
                None => format!("{short_id:<13}  {status:<7}  {summary:<48}  {relative_time}"),
            }
        })
        .collect()
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.id.to_string(),
        collection: record.collection.to_string(),
        owner_id: record.owner_id.clone(),
        record_date: record.record_date.clone(),
        summary: record_summary(record),
        sync_status: record.sync_status.to_string(),
        server_id: record.server_id.clone(),
        last_error: record.last_error.clone(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.updated_at, now_ms),
        payload: record.payload.clone(),
    }
}

/// One-line description of a record's payload.
pub fn record_summary(record: &Record) -> String {
    let summary = match record.collection {
        Collection::Patient => record
            .decode::<PatientPayload>()
            .map(|patient| match patient.village {
                Some(village) => format!("{} ({village})", patient.name),
                None => patient.name,
            }),
        Collection::Appointment => record.decode::<AppointmentPayload>().map(|appointment| {
            format!(
                "{} with {} at {}",
                appointment.status, appointment.doctor_id, appointment.scheduled_at
            )
        }),
        Collection::Prescription => record.decode::<PrescriptionPayload>().map(|prescription| {
            let count = prescription.medications.len();
            format!(
                "{count} medication{} on {}",
                if count == 1 { "" } else { "s" },
                prescription.issued_on
            )
        }),
        Collection::HealthRecord => record
            .decode::<HealthRecordPayload>()
            .map(|entry| format!("{}: {}", entry.record_type, entry.summary)),
        Collection::VoiceCommandLog => record
            .decode::<VoiceCommandLogPayload>()
            .map(|entry| format!("[{}] {}", entry.language, entry.transcript)),
        Collection::EmergencyEvent => record.decode::<EmergencyEventPayload>().map(|alert| {
            alert.message.map_or_else(
                || format!("SOS {}", alert.status),
                |message| format!("SOS {}: {message}", alert.status),
            )
        }),
    };

    summary.map_or_else(|_| "(unreadable payload)".to_string(), |text| compact_text(&text))
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
