//! Core types shared by the local store, remote clients, and the planner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The three supported storage providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
}

impl Provider {
    /// Stable lowercase identifier, used in cache file names and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aws" | "s3" => Some(Provider::Aws),
            "azure" => Some(Provider::Azure),
            "gcp" | "gcs" => Some(Provider::Gcp),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record for one file, shared by local and remote listings.
///
/// `name` is the vault-relative forward-slash path and the sole key for
/// cross-side comparison: two entries describe the same file iff their
/// `name` matches byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Vault-relative path, normalized: forward slashes, no `.`/`..`
    /// segments, no leading slash.
    pub name: String,

    /// Absolute filesystem path. Empty for remote-only entries until the
    /// executor materializes them.
    pub local_name: PathBuf,

    /// The exact key/blob-name as stored remotely, vault prefix included,
    /// percent-encoded where the provider requires it. Preserved byte-exact
    /// because providers differ in case-folding on percent escapes.
    pub remote_name: String,

    /// Best-effort media type. Informational only.
    pub mime: String,

    /// Timestamp from the side that produced this entry.
    pub last_modified: DateTime<Utc>,

    /// Size in bytes.
    pub size: u64,

    /// Lowercase hex MD5 of the contents. Empty string means unknown
    /// (e.g. an S3 multipart ETag); unknown-vs-known compares as different.
    pub md5: String,

    /// Always false in the reconciled set; directories are filtered out
    /// before planning.
    pub is_directory: bool,
}

impl FileEntry {
    /// A remote-only entry as produced by a provider listing.
    pub fn remote(
        name: String,
        remote_name: String,
        last_modified: DateTime<Utc>,
        size: u64,
        md5: String,
    ) -> Self {
        let mime = guess_mime(&name);
        Self {
            name,
            local_name: PathBuf::new(),
            remote_name,
            mime,
            last_modified,
            size,
            md5,
            is_directory: false,
        }
    }

    /// A local-only entry as produced by the vault walk.
    pub fn local(
        name: String,
        local_name: PathBuf,
        last_modified: DateTime<Utc>,
        size: u64,
        md5: String,
    ) -> Self {
        let mime = guess_mime(&name);
        Self {
            name,
            local_name,
            remote_name: String::new(),
            mime,
            last_modified,
            size,
            md5,
            is_directory: false,
        }
    }
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// The five sync actions a reconciliation can assign to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    LocalToRemote,
    RemoteToLocal,
    DeleteLocal,
    DeleteRemote,
    DiffMerge,
}

impl Rule {
    pub const ALL: [Rule; 5] = [
        Rule::LocalToRemote,
        Rule::RemoteToLocal,
        Rule::DeleteLocal,
        Rule::DeleteRemote,
        Rule::DiffMerge,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Rule::LocalToRemote => "upload",
            Rule::RemoteToLocal => "download",
            Rule::DeleteLocal => "delete local",
            Rule::DeleteRemote => "delete remote",
            Rule::DiffMerge => "merge",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One planned action for one file in one reconciliation run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub local: Option<FileEntry>,
    pub remote: Option<FileEntry>,
    pub rule: Rule,
}

impl Scenario {
    /// The canonical name of the file this scenario acts on.
    pub fn name(&self) -> &str {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(|e| e.name.as_str())
            .expect("scenario without either side")
    }
}

/// Errors from normalizing a user-visible path into a canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameError(String);

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for NameError {}

/// Normalize a raw relative path into a canonical vault name.
///
/// Backslashes become forward slashes, leading slashes are stripped, and
/// `.`/`..`/empty segments are rejected along with NUL bytes.
pub fn normalize_name(raw: &str) -> Result<String, NameError> {
    if raw.contains('\0') {
        return Err(NameError("name must not contain NUL bytes".to_string()));
    }
    let unified = raw.replace('\\', "/");
    let trimmed = unified.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(NameError("name must not be empty".to_string()));
    }
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(NameError(format!("empty path segment in {:?}", raw)));
        }
        if segment == "." || segment == ".." {
            return Err(NameError(format!(
                "name must not contain '.' or '..' segments: {:?}",
                raw
            )));
        }
    }
    Ok(trimmed.to_string())
}
