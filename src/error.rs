//! Error taxonomy for sync runs
//!
//! Per-provider errors carry the provider name so a multi-provider run can
//! report which mirror failed without aborting the others.

use thiserror::Error;

/// Top-level sync error surfaced to the embedding host / CLI.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing or malformed credentials, bucket names, or vault paths.
    /// Surfaced immediately, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential accepted at config time but rejected by the provider.
    #[error("{provider}: authentication rejected: {message}")]
    Auth { provider: &'static str, message: String },

    /// DNS, TCP, or TLS failure after retry exhaustion.
    #[error("{provider}: connectivity failure: {message}")]
    Connectivity { provider: &'static str, message: String },

    /// Unexpected HTTP status or body shape.
    #[error("{provider}: unexpected response: {message}")]
    Wire { provider: &'static str, message: String },

    /// A specific object was expected but absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// User-initiated abort. Terminal; the cache is not committed.
    #[error("sync cancelled")]
    Cancelled,

    /// Non-text content on both diverging sides of a merge.
    #[error("merge failed for {name}: {message}")]
    Merge { name: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    CacheFormat(#[from] serde_json::Error),
}
