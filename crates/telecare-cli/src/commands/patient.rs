use telecare_core::models::PatientPayload;
use telecare_core::util::normalize_text_option;
use telecare_core::{RecordId, SyncSettings};

use crate::commands::common::{normalize_name, open_engine};
use crate::error::CliError;

#[derive(Debug, Default)]
pub struct PatientDetails {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub village: Option<String>,
    pub language: Option<String>,
}

pub async fn run_patient_add(
    name_parts: &[String],
    details: PatientDetails,
    settings: &SyncSettings,
) -> Result<RecordId, CliError> {
    let patient = PatientPayload {
        age: details.age,
        gender: normalize_text_option(details.gender),
        phone: normalize_text_option(details.phone),
        village: normalize_text_option(details.village),
        preferred_language: normalize_text_option(details.language),
        ..PatientPayload::new(normalize_name(name_parts))
    };

    let engine = open_engine(settings).await?;
    let id = engine.add_patient(patient).await?;

    println!("{id}");
    Ok(id)
}
