//! Per-provider fingerprint cache
//!
//! One JSON file per (vault, provider) holding the `name -> md5` map from
//! the last successful sync plus its timestamp. This is the only durable
//! state the tool owns beyond the user's files, and its atomic rewrite is
//! the commit point of a run: it is updated from the post-sync remote
//! listing only, and never on partial failure or cancellation.

use crate::error::SyncError;
use crate::types::{FileEntry, Provider};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// On-disk shape. Unknown fields are ignored on read.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    last_sync: Option<String>,
    #[serde(default)]
    file_cache: Vec<(String, String)>,
}

pub struct SyncCache {
    path: PathBuf,
    last_sync: DateTime<Utc>,
    entries: BTreeMap<String, String>,
}

impl SyncCache {
    /// The backing file for one (vault, provider) pair.
    pub fn cache_path(state_dir: &Path, provider: Provider) -> PathBuf {
        state_dir.join(format!("cloudsync-{}.json", provider.as_str()))
    }

    /// Load the cache; a missing or corrupt file yields an empty map with
    /// `last_sync` at the epoch.
    pub fn open(state_dir: &Path, provider: Provider) -> Self {
        let path = Self::cache_path(state_dir, provider);
        let (last_sync, entries) = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheFile>(&content) {
                Ok(parsed) => {
                    let stamp = parsed
                        .last_sync
                        .as_deref()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(epoch);
                    (stamp, parsed.file_cache.into_iter().collect())
                }
                Err(e) => {
                    warn!("cache {} is corrupt ({}), starting empty", path.display(), e);
                    (epoch(), BTreeMap::new())
                }
            },
            Err(_) => (epoch(), BTreeMap::new()),
        };
        debug!(
            "cache {}: {} entries, last sync {}",
            path.display(),
            entries.len(),
            last_sync
        );
        Self {
            path,
            last_sync,
            entries,
        }
    }

    pub fn last_sync(&self) -> DateTime<Utc> {
        self.last_sync
    }

    pub fn digest(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the in-memory map and delete the backing file. Missing files
    /// are tolerated.
    pub fn clear(&mut self) -> Result<(), SyncError> {
        self.entries.clear();
        self.last_sync = epoch();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuild the map from the post-sync remote listing and persist
    /// atomically. `at` becomes the new `last_sync`.
    pub fn commit(&mut self, remote: &[FileEntry], at: DateTime<Utc>) -> Result<(), SyncError> {
        self.entries = remote
            .iter()
            .map(|e| (e.name.clone(), e.md5.clone()))
            .collect();
        self.last_sync = at;

        let file = CacheFile {
            last_sync: Some(at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()),
            file_cache: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_string(&file)?;

        let parent = self
            .path
            .parent()
            .ok_or_else(|| SyncError::Configuration("cache path has no parent".into()))?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SyncError::Io(e.error))?;
        debug!("cache {} committed: {} entries", self.path.display(), self.entries.len());
        Ok(())
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str, md5: &str) -> FileEntry {
        FileEntry::remote(
            name.to_string(),
            format!("vault/{}", name),
            Utc::now(),
            1,
            md5.to_string(),
        )
    }

    #[test]
    fn test_open_missing_is_empty_epoch() {
        let dir = tempdir().unwrap();
        let cache = SyncCache::open(dir.path(), Provider::Aws);
        assert!(cache.is_empty());
        assert_eq!(cache.last_sync().timestamp(), 0);
    }

    #[test]
    fn test_commit_then_reopen() {
        let dir = tempdir().unwrap();
        let mut cache = SyncCache::open(dir.path(), Provider::Aws);
        let at = Utc::now();
        cache
            .commit(&[entry("a.md", "aaa"), entry("b.md", "bbb")], at)
            .unwrap();

        let reopened = SyncCache::open(dir.path(), Provider::Aws);
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.digest("a.md"), Some("aaa"));
        assert!(reopened.contains("b.md"));
        // Millisecond precision survives the round-trip.
        assert_eq!(reopened.last_sync().timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_file_shape() {
        let dir = tempdir().unwrap();
        let mut cache = SyncCache::open(dir.path(), Provider::Aws);
        cache.commit(&[entry("notes/a.md", "d41d8cd98f00b204e9800998ecf8427e")], Utc::now())
            .unwrap();

        let content =
            std::fs::read_to_string(SyncCache::cache_path(dir.path(), Provider::Aws)).unwrap();
        assert!(content.starts_with("{\"last_sync\":\""));
        assert!(content.contains("\"file_cache\":[[\"notes/a.md\",\"d41d8cd98f00b204e9800998ecf8427e\"]]"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let dir = tempdir().unwrap();
        let path = SyncCache::cache_path(dir.path(), Provider::Azure);
        std::fs::write(
            &path,
            r#"{"last_sync":"2024-01-01T12:34:56.000Z","file_cache":[["a.md","x"]],"schema":3}"#,
        )
        .unwrap();
        let cache = SyncCache::open(dir.path(), Provider::Azure);
        assert_eq!(cache.digest("a.md"), Some("x"));
        assert_eq!(cache.last_sync().timestamp(), 1704112496);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = SyncCache::cache_path(dir.path(), Provider::Gcp);
        std::fs::write(&path, "not json at all").unwrap();
        let cache = SyncCache::open(dir.path(), Provider::Gcp);
        assert!(cache.is_empty());
        assert_eq!(cache.last_sync().timestamp(), 0);
    }

    #[test]
    fn test_clear_tolerates_missing() {
        let dir = tempdir().unwrap();
        let mut cache = SyncCache::open(dir.path(), Provider::Aws);
        cache.clear().unwrap();
        cache.commit(&[entry("a.md", "x")], Utc::now()).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!SyncCache::cache_path(dir.path(), Provider::Aws).exists());
    }

    #[test]
    fn test_per_provider_files_are_independent() {
        let dir = tempdir().unwrap();
        let mut aws = SyncCache::open(dir.path(), Provider::Aws);
        aws.commit(&[entry("a.md", "x")], Utc::now()).unwrap();
        let azure = SyncCache::open(dir.path(), Provider::Azure);
        assert!(azure.is_empty());
    }
}
