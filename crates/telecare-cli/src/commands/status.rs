use serde::Serialize;
use telecare_core::{SyncSettings, SyncSummary};

use crate::commands::common::{format_sync_timestamp, open_engine};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub summary: SyncSummary,
    pub last_sync_error: Option<String>,
    pub database: String,
}

pub async fn load_status(settings: &SyncSettings) -> Result<StatusReport, CliError> {
    let engine = open_engine(settings).await?;
    let summary = engine.summary().await?;
    let meta = engine.store().sync_meta().await?;
    let database = engine.store().path().map_or_else(
        || "in-memory".to_string(),
        |path| path.display().to_string(),
    );

    Ok(StatusReport {
        summary,
        last_sync_error: meta.last_sync_error,
        database,
    })
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let summary = &report.summary;
    let mut lines = vec![
        format!("Database:   {}", report.database),
        format!("Records:    {}", summary.total),
        format!("Pending:    {}", summary.pending),
        format!("Failed:     {}", summary.failed),
        format!("Queued:     {}", summary.queued),
        format!(
            "Last sync:  {}",
            summary
                .last_sync_at
                .map_or_else(|| "never".to_string(), format_sync_timestamp)
        ),
    ];
    if let Some(error) = &report.last_sync_error {
        lines.push(format!("Last error: {error}"));
    }
    if summary.degraded {
        lines.push("Warning: running on an in-memory store; changes are not persisted".to_string());
    }
    lines
}

pub async fn run_status(as_json: bool, settings: &SyncSettings) -> Result<(), CliError> {
    let report = load_status(settings).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}
