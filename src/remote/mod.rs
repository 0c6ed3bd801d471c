//! Provider clients: a uniform object-store contract over three wire protocols
//!
//! Each provider implements `ObjectStore`; everything above this module
//! (reconciler, executor, orchestrator) is provider-agnostic. The module
//! also owns the shared retry policy and HTTP error classification.

pub mod azure;
pub mod gcs;
pub mod s3;
pub mod sigv4;
pub mod xml;

use crate::error::SyncError;
use crate::paths::PathCodec;
use crate::types::{FileEntry, Provider};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Per-request timeout; timeouts count as transient and are retried.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transient failures get 3 attempts with backoff of 1s then 2s.
const MAX_ATTEMPTS: u32 = 3;

/// Uniform error surface shared by all three providers.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 401/403 — credentials accepted at config time but rejected on the wire.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// 404 on a specific object. Not a sync error on listings.
    #[error("object not found: {0}")]
    NotFound(String),

    /// 429/503 — retried with backoff before surfacing.
    #[error("rate limited by provider")]
    RateLimited,

    /// DNS/TCP/TLS/timeout failures.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// Unexpected HTTP status, with the provider's `<Code>: <Message>` when present.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body did not parse as the expected shape.
    #[error("unexpected response body: {0}")]
    Wire(String),

    /// Missing or malformed credentials; never retried.
    #[error("configuration: {0}")]
    Configuration(String),
}

impl RemoteError {
    /// Whether the retry loop should try again.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Connectivity(_) | RemoteError::RateLimited => true,
            RemoteError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Attach the provider name and lift into the public taxonomy.
    pub fn into_sync(self, provider: Provider) -> SyncError {
        let name = provider.as_str();
        match self {
            RemoteError::Auth(message) => SyncError::Auth {
                provider: name,
                message,
            },
            RemoteError::NotFound(what) => SyncError::NotFound(what),
            RemoteError::RateLimited => SyncError::Connectivity {
                provider: name,
                message: "rate limited after retries".to_string(),
            },
            RemoteError::Connectivity(message) => SyncError::Connectivity {
                provider: name,
                message,
            },
            RemoteError::Status { status, message } => SyncError::Wire {
                provider: name,
                message: format!("HTTP {}: {}", status, message),
            },
            RemoteError::Wire(message) => SyncError::Wire {
                provider: name,
                message,
            },
            RemoteError::Configuration(message) => SyncError::Configuration(message),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Connectivity(e.to_string())
    }
}

/// Uniform read/write/delete/list contract over the three providers.
///
/// Object-safe so the executor can hold a `dyn ObjectStore`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn provider(&self) -> Provider;

    /// Establish credentials (mint SAS / OAuth token, probe the bucket).
    /// Cheap to call repeatedly; used by connectivity tests.
    async fn authenticate(&self) -> Result<(), RemoteError>;

    /// Full listing under the vault prefix, directories filtered out.
    /// An empty result is the "fresh remote" signal the orchestrator turns
    /// into a cache clear.
    async fn list(&self) -> Result<Vec<FileEntry>, RemoteError>;

    async fn read(&self, entry: &FileEntry) -> Result<Bytes, RemoteError>;

    async fn write(&self, entry: &FileEntry, body: Bytes) -> Result<(), RemoteError>;

    async fn delete(&self, entry: &FileEntry) -> Result<(), RemoteError>;
}

/// Run `op` with the shared retry policy: transient errors back off
/// exponentially (base 1s, doubling) for up to three attempts.
pub(crate) async fn with_retries<T, F, Fut>(what: &str, mut op: F) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, RemoteError>>,
{
    let mut delay = Duration::from_secs(1);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, MAX_ATTEMPTS, e, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Classify a non-success HTTP response into the uniform error set.
pub(crate) fn classify_status(status: u16, body: &str, context: &str) -> RemoteError {
    match status {
        401 | 403 => {
            let detail = xml::parse_error_body(body)
                .map(|(code, message)| format!("{}: {}", code, message))
                .unwrap_or_else(|| format!("HTTP {}", status));
            RemoteError::Auth(detail)
        }
        404 => RemoteError::NotFound(context.to_string()),
        429 | 503 => RemoteError::RateLimited,
        _ => {
            let message = xml::parse_error_body(body)
                .map(|(code, message)| format!("{}: {}", code, message))
                .unwrap_or_else(|| truncate_body(body));
            RemoteError::Status { status, message }
        }
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 200 {
        let cut: String = trimmed.chars().take(200).collect();
        format!("{}…", cut)
    } else {
        trimmed.to_string()
    }
}

/// Shared HTTP client construction: rustls, fixed per-request timeout.
pub(crate) fn http_client() -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RemoteError::Configuration(format!("HTTP client: {}", e)))
}

/// The remote key for an entry: the preserved byte-exact key when known,
/// otherwise derived from the canonical name through the codec.
pub(crate) fn remote_key_for(codec: &PathCodec, entry: &FileEntry) -> String {
    if entry.remote_name.is_empty() {
        codec.local_to_remote(&entry.name)
    } else {
        entry.remote_name.clone()
    }
}
