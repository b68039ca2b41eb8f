use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use telecare_core::models::AppointmentStatus;
use telecare_core::{Collection, SyncStatus};

#[derive(Parser)]
#[command(name = "telecare")]
#[command(about = "Record patient care offline and sync it when a connection is available")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional JSON settings file (environment variables still apply on top)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Never contact the sync service; everything stays queued
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage patients
    Patient {
        #[command(subcommand)]
        command: PatientCommands,
    },
    /// Manage appointments
    #[command(alias = "appt")]
    Appointment {
        #[command(subcommand)]
        command: AppointmentCommands,
    },
    /// Raise or cancel an emergency alert
    Sos {
        #[command(subcommand)]
        command: SosCommands,
    },
    /// List stored records
    List {
        /// Record collection
        #[arg(value_enum)]
        collection: CollectionArg,
        /// Only records for this patient
        #[arg(long, value_name = "ID")]
        patient: Option<String>,
        /// Only records for this day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        date: Option<String>,
        /// Only records in this sync state
        #[arg(long, value_enum)]
        status: Option<SyncStatusArg>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pending, failed and queued counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued changes to the sync service
    Sync,
    /// Queue a failed record again
    Retry {
        #[arg(value_enum)]
        collection: CollectionArg,
        /// Record ID
        id: String,
    },
    /// Delete a local record and anything queued for it
    Delete {
        #[arg(value_enum)]
        collection: CollectionArg,
        /// Record ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum PatientCommands {
    /// Register a patient
    Add {
        /// Patient name
        #[arg(required = true)]
        name: Vec<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        village: Option<String>,
        /// Preferred language code, e.g. hi-IN
        #[arg(long, value_name = "CODE")]
        language: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AppointmentCommands {
    /// Book a consultation
    Book {
        #[arg(long, value_name = "ID")]
        patient: String,
        #[arg(long, value_name = "ID")]
        doctor: String,
        /// RFC 3339 start time
        #[arg(long, value_name = "TIME")]
        at: String,
        #[arg(long)]
        reason: Option<String>,
        /// Consultation mode, e.g. video or in-person
        #[arg(long)]
        mode: Option<String>,
    },
    /// Change an appointment's status
    SetStatus {
        /// Appointment record ID
        id: String,
        #[arg(value_enum)]
        status: AppointmentStatusArg,
    },
}

#[derive(Subcommand)]
pub enum SosCommands {
    /// Raise an emergency alert
    Raise {
        #[arg(long, value_name = "ID")]
        patient: String,
        /// Free-text description
        #[arg(long)]
        message: Option<String>,
        #[arg(long, allow_negative_numbers = true)]
        latitude: Option<f64>,
        #[arg(long, allow_negative_numbers = true)]
        longitude: Option<f64>,
    },
    /// Withdraw an alert that has not been delivered
    Cancel {
        /// Emergency event record ID
        id: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CollectionArg {
    Patient,
    Appointment,
    Prescription,
    HealthRecord,
    VoiceCommandLog,
    EmergencyEvent,
}

impl From<CollectionArg> for Collection {
    fn from(value: CollectionArg) -> Self {
        match value {
            CollectionArg::Patient => Self::Patient,
            CollectionArg::Appointment => Self::Appointment,
            CollectionArg::Prescription => Self::Prescription,
            CollectionArg::HealthRecord => Self::HealthRecord,
            CollectionArg::VoiceCommandLog => Self::VoiceCommandLog,
            CollectionArg::EmergencyEvent => Self::EmergencyEvent,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SyncStatusArg {
    Pending,
    Synced,
    Failed,
}

impl From<SyncStatusArg> for SyncStatus {
    fn from(value: SyncStatusArg) -> Self {
        match value {
            SyncStatusArg::Pending => Self::Pending,
            SyncStatusArg::Synced => Self::Synced,
            SyncStatusArg::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum AppointmentStatusArg {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl From<AppointmentStatusArg> for AppointmentStatus {
    fn from(value: AppointmentStatusArg) -> Self {
        match value {
            AppointmentStatusArg::Scheduled => Self::Scheduled,
            AppointmentStatusArg::Confirmed => Self::Confirmed,
            AppointmentStatusArg::Completed => Self::Completed,
            AppointmentStatusArg::Cancelled => Self::Cancelled,
        }
    }
}
