use std::sync::Arc;

use telecare_core::emergency::{FixedGeolocator, Geolocator, NoGeolocator, SosReceipt, SosRequest};
use telecare_core::models::Location;
use telecare_core::sync::DrainOutcome;
use telecare_core::util::normalize_text_option;
use telecare_core::SyncSettings;

use crate::commands::common::{open_engine, open_engine_with, parse_record_id, probe_connectivity};
use crate::error::CliError;

#[derive(Debug, Default)]
pub struct SosAlert {
    pub patient_id: String,
    pub message: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub fn alert_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<Location, CliError> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Ok(Location::Known {
            latitude,
            longitude,
            accuracy_m: None,
        }),
        (None, None) => Ok(Location::Unknown),
        _ => Err(CliError::IncompleteLocation),
    }
}

pub async fn run_sos_raise(
    alert: SosAlert,
    offline: bool,
    settings: &SyncSettings,
) -> Result<SosReceipt, CliError> {
    let geolocator: Arc<dyn Geolocator> = match alert_location(alert.latitude, alert.longitude)? {
        Location::Unknown => Arc::new(NoGeolocator),
        known => Arc::new(FixedGeolocator(known)),
    };

    let engine = open_engine_with(settings, geolocator).await?;
    if !offline {
        probe_connectivity(&engine).await?;
    }

    let mut request = SosRequest::new(alert.patient_id.trim());
    request.message = normalize_text_option(alert.message);
    let receipt = engine.raise_sos(request).await?;

    println!("{}", receipt.record_id);
    match receipt.dispatch {
        _ if receipt.delivered() => println!("SOS delivered"),
        Some(DrainOutcome::Completed(_)) => {
            println!("SOS stored; delivery failed and will be retried on the next sync");
        }
        _ => println!("SOS stored and queued at high priority; run `telecare sync` once online"),
    }
    Ok(receipt)
}

pub async fn run_sos_cancel(id: &str, settings: &SyncSettings) -> Result<(), CliError> {
    let id = parse_record_id(id)?;
    let engine = open_engine(settings).await?;

    if engine.cancel_sos(&id).await? {
        println!("{id} cancelled");
    } else {
        println!("{id} was already cancelled");
    }
    Ok(())
}
