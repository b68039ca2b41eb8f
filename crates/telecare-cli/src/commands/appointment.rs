use telecare_core::models::{AppointmentPayload, AppointmentStatus};
use telecare_core::util::normalize_text_option;
use telecare_core::{RecordId, SyncSettings};

use crate::commands::common::{open_engine, parse_record_id};
use crate::error::CliError;

#[derive(Debug)]
pub struct Booking {
    pub patient_id: String,
    pub doctor_id: String,
    pub scheduled_at: String,
    pub reason: Option<String>,
    pub mode: Option<String>,
}

pub async fn run_book(booking: Booking, settings: &SyncSettings) -> Result<RecordId, CliError> {
    let appointment = AppointmentPayload {
        reason: normalize_text_option(booking.reason),
        consultation_mode: normalize_text_option(booking.mode),
        ..AppointmentPayload::new(
            booking.patient_id.trim(),
            booking.doctor_id.trim(),
            booking.scheduled_at.trim(),
        )
    };

    let engine = open_engine(settings).await?;
    let id = engine.book_appointment(appointment).await?;

    println!("{id}");
    Ok(id)
}

pub async fn run_set_status(
    id: &str,
    status: AppointmentStatus,
    settings: &SyncSettings,
) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    let engine = open_engine(settings).await?;
    engine.update_appointment_status(&id, status).await?;

    println!("{id} {status}");
    Ok(())
}
