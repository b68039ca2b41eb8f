use telecare_core::sync::{DrainOutcome, DrainReport};
use telecare_core::SyncSettings;

use crate::commands::common::{open_engine, probe_connectivity};
use crate::error::CliError;

pub async fn run_sync(offline: bool, settings: &SyncSettings) -> Result<DrainOutcome, CliError> {
    if settings.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }

    let engine = open_engine(settings).await?;
    if offline || !probe_connectivity(&engine).await? {
        let queued = engine.summary().await?.queued;
        println!("Sync service unreachable; {queued} change(s) remain queued");
        return Ok(DrainOutcome::Offline);
    }

    let outcome = engine.request_sync().await?;
    match &outcome {
        DrainOutcome::Completed(report) => println!("{}", format_drain_report(report)),
        DrainOutcome::Offline => {
            println!("Connection lost during sync; remaining changes stay queued");
        }
        DrainOutcome::AlreadyDraining => println!("A sync is already in progress"),
    }
    Ok(outcome)
}

pub fn format_drain_report(report: &DrainReport) -> String {
    if report.dispatched == 0 && report.dropped == 0 {
        return "Nothing to sync".to_string();
    }
    let mut line = format!(
        "Sync completed: {} synced, {} will retry, {} failed",
        report.synced, report.retried, report.failed
    );
    if report.dropped > 0 {
        line.push_str(&format!(", {} stale skipped", report.dropped));
    }
    line
}
