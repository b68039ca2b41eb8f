//! Error types for telecare-core

use thiserror::Error;

/// Result type alias using telecare-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in telecare-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether the error means the storage engine itself is unusable
    /// (as opposed to a bad query or missing row).
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Database(message) => is_storage_failure_message(message),
            Self::LibSql(error) => is_storage_failure_message(&error.to_string()),
            _ => false,
        }
    }
}

fn is_storage_failure_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("file is not a database")
        || message.contains("disk i/o error")
        || message.contains("unable to open database")
        || message.contains("database disk image is malformed")
        || message.contains("readonly database")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_storage_unavailable_errors() {
        assert!(Error::Database("SQLite failure: file is not a database".to_string())
            .is_storage_unavailable());
        assert!(Error::Database("disk I/O error".to_string()).is_storage_unavailable());
        assert!(Error::Io(std::io::Error::other("gone")).is_storage_unavailable());
        assert!(!Error::InvalidInput("patient name is required".to_string())
            .is_storage_unavailable());
        assert!(!Error::NotFound("record".to_string()).is_storage_unavailable());
    }
}
