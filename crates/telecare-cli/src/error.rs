use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] telecare_core::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Invalid record ID: {0}")]
    InvalidRecordId(String),
    #[error("Latitude and longitude must be given together")]
    IncompleteLocation,
    #[error(
        "Sync is not configured. Set TELECARE_API_BASE_URL (and TELECARE_API_TOKEN if the service needs one), or pass --config with an api_base_url."
    )]
    SyncNotConfigured,
}
