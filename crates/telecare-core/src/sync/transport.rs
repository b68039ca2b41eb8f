//! Remote sync contract and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Collection, QueueEntry, Record, SyncAction};
use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

/// Header carrying the per-entry idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// One queued mutation as sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRequest {
    pub action: SyncAction,
    #[serde(skip)]
    pub collection: Collection,
    pub idempotency_key: String,
    pub record: Record,
}

impl SyncRequest {
    pub fn new(entry: &QueueEntry, record: Record) -> Self {
        Self {
            action: entry.action,
            collection: entry.collection,
            idempotency_key: entry.idempotency_key(),
            record,
        }
    }
}

/// Server acknowledgement of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAck {
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Why a mutation was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network failure, timeout, 5xx, throttling, or anything unclassified.
    #[error("transient sync failure: {0}")]
    Transient(String),
    /// The server refused the mutation; retrying will not help.
    #[error("sync rejected: {0}")]
    Rejected(String),
}

impl SyncError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Rejected(message) => message,
        }
    }
}

/// Delivers one queued mutation to the remote service.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn send(&self, request: &SyncRequest) -> std::result::Result<SyncAck, SyncError>;
}

/// `POST {base_url}/v1/sync/{collection}` per entry.
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    fn endpoint(&self, collection: Collection) -> String {
        format!("{}/v1/sync/{}", self.base_url, collection.as_str())
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn send(&self, request: &SyncRequest) -> std::result::Result<SyncAck, SyncError> {
        let mut builder = self
            .client
            .post(self.endpoint(request.collection))
            .header("Accept", "application/json")
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| SyncError::Transient(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            // An empty or unparseable success body is still an acceptance.
            return Ok(serde_json::from_str::<SyncAck>(&body).unwrap_or_default());
        }
        Err(classify_failure(status, &body))
    }
}

/// Placeholder used when no sync endpoint is configured. Every entry stays
/// queued until one is.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransport;

#[async_trait]
impl SyncTransport for UnconfiguredTransport {
    async fn send(&self, _request: &SyncRequest) -> std::result::Result<SyncAck, SyncError> {
        Err(SyncError::Transient(
            "sync endpoint is not configured".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct SyncErrorBody {
    error: Option<String>,
    message: Option<String>,
    kind: Option<String>,
}

fn classify_failure(status: StatusCode, body: &str) -> SyncError {
    let parsed = serde_json::from_str::<SyncErrorBody>(body).ok();

    let message = match parsed
        .as_ref()
        .and_then(|payload| payload.message.clone().or_else(|| payload.error.clone()))
    {
        Some(message) => format!("{} ({})", compact_text(&message), status.as_u16()),
        None if body.trim().is_empty() => format!("HTTP {}", status.as_u16()),
        None => format!("{} ({})", compact_text(body), status.as_u16()),
    };

    let explicit_kind = parsed
        .and_then(|payload| payload.kind)
        .map(|kind| kind.trim().to_ascii_lowercase());
    match explicit_kind.as_deref() {
        Some("rejected") => return SyncError::Rejected(message),
        Some("transient") => return SyncError::Transient(message),
        _ => {}
    }

    let retryable = matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !retryable {
        SyncError::Rejected(message)
    } else {
        SyncError::Transient(message)
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let base_url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("sync base url must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "sync base url must include http:// or https://".to_string(),
        ))
    }
}
