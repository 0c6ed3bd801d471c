//! Local vault store: walk, fingerprinting, atomic writes
//!
//! The walk skips any path component named in the ignore set plus the
//! sync state directory. Fingerprints are memoized keyed by
//! `(path, mtime)` so unchanged files are hashed once across runs of a
//! long-lived process. Writes go through temp-file + rename and restore
//! the source-of-truth modification time so a downloaded file does not
//! immediately look locally edited.

use crate::config::STATE_DIR_NAME;
use crate::error::SyncError;
use crate::types::{normalize_name, FileEntry};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::FileTimes;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

pub struct LocalStore {
    root: PathBuf,
    ignore: HashSet<String>,
    /// Memoized digests keyed by path; invalidated when mtime moves.
    fingerprints: Mutex<HashMap<PathBuf, (SystemTime, String)>>,
}

impl LocalStore {
    pub fn new(root: PathBuf, ignore: &[String]) -> Self {
        let mut set: HashSet<String> = ignore.iter().cloned().collect();
        set.insert(STATE_DIR_NAME.to_string());
        Self {
            root,
            ignore: set,
            fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Walk the vault and produce the current file set. Directories are
    /// filtered out; empty directories are never mirrored.
    pub async fn list(&self) -> Result<Vec<FileEntry>, SyncError> {
        let mut entries = Vec::new();
        self.walk(self.root.clone(), &mut entries).await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("local: listed {} files under {}", entries.len(), self.root.display());
        Ok(entries)
    }

    fn walk<'a>(
        &'a self,
        dir: PathBuf,
        out: &'a mut Vec<FileEntry>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SyncError>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut reader = fs::read_dir(&dir).await?;
            while let Some(entry) = reader.next_entry().await? {
                let path = entry.path();
                let Some(component) = path.file_name().and_then(|n| n.to_str()) else {
                    warn!("local: skipping non-UTF-8 path {}", path.display());
                    continue;
                };
                if self.ignore.contains(component) {
                    debug!("local: ignoring {}", path.display());
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    self.walk(path, out).await?;
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let raw = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                let name = match normalize_name(&raw) {
                    Ok(n) => n,
                    Err(e) => {
                        warn!("local: skipping {}: {}", path.display(), e);
                        continue;
                    }
                };

                let metadata = entry.metadata().await?;
                let mtime = metadata.modified()?;
                let md5 = self.fingerprint(&path, mtime).await?;
                out.push(FileEntry::local(
                    name,
                    path,
                    DateTime::<Utc>::from(mtime),
                    metadata.len(),
                    md5,
                ));
            }
            Ok(())
        })
    }

    /// Hex MD5 of a file, memoized by `(path, mtime)`.
    async fn fingerprint(&self, path: &Path, mtime: SystemTime) -> Result<String, SyncError> {
        if let Some((cached_mtime, digest)) = self.fingerprints.lock().get(path) {
            if *cached_mtime == mtime {
                return Ok(digest.clone());
            }
        }
        let data = fs::read(path).await?;
        let digest = hex::encode(Md5::digest(&data));
        self.fingerprints
            .lock()
            .insert(path.to_path_buf(), (mtime, digest.clone()));
        Ok(digest)
    }

    pub async fn read(&self, name: &str) -> Result<Bytes, SyncError> {
        let path = self.absolute(name);
        let data = fs::read(&path).await?;
        Ok(Bytes::from(data))
    }

    /// Write a file atomically (mkdir-p, temp, rename) and restore the
    /// given modification time.
    pub async fn write(
        &self,
        name: &str,
        data: &[u8],
        last_modified: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let path = self.absolute(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let data = data.to_vec();
        let target = path.clone();
        let mtime = system_time_from(last_modified);

        tokio::task::spawn_blocking(move || -> Result<(), SyncError> {
            let mut tmp = NamedTempFile::new_in(&parent)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            let file = tmp.persist(&target).map_err(|e| SyncError::Io(e.error))?;
            file.set_times(FileTimes::new().set_modified(mtime))?;
            Ok(())
        })
        .await
        .map_err(|e| SyncError::Io(std::io::Error::other(format!("join failed: {}", e))))??;
        Ok(())
    }

    /// Delete a file and prune now-empty parent directories up to (not
    /// including) the vault root.
    pub async fn delete(&self, name: &str) -> Result<(), SyncError> {
        let path = self.absolute(name);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("local: delete of absent file {} treated as success", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        self.fingerprints.lock().remove(&path);

        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            match fs::remove_dir(&current).await {
                Ok(()) => {
                    debug!("local: pruned empty directory {}", current.display());
                    dir = current.parent().map(Path::to_path_buf);
                }
                Err(_) => break, // not empty, or already gone
            }
        }
        Ok(())
    }
}

fn system_time_from(dt: DateTime<Utc>) -> SystemTime {
    let millis = dt.timestamp_millis();
    if millis >= 0 {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(millis as u64)
    } else {
        SystemTime::UNIX_EPOCH
    }
}
