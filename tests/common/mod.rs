//! Shared test fixtures: an in-memory object store and vault helpers
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cloudsync::paths::PathCodec;
use cloudsync::remote::{ObjectStore, RemoteError};
use cloudsync::types::{FileEntry, Provider};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Drop a file into the vault fixture with plain blocking I/O.
pub fn write_vault_file(root: &Path, name: &str, content: &[u8]) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// In-memory `ObjectStore` standing in for a provider. Keys are real
/// remote keys (vault prefix included) produced by the S3 codec, so the
/// round-trip through `remote_to_local` is exercised on every listing.
pub struct MemoryStore {
    codec: PathCodec,
    objects: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
    /// When set, the next write fails with a permanent error.
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new(vault_name: &str) -> Self {
        Self {
            codec: PathCodec::new(Provider::Aws, vault_name),
            objects: Mutex::new(BTreeMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    fn key(&self, name: &str) -> String {
        self.codec.local_to_remote(name)
    }

    /// Seed an object by canonical name, as if another client uploaded it.
    pub fn insert(&self, name: &str, data: &[u8]) {
        self.insert_at(name, data, Utc::now());
    }

    pub fn insert_at(&self, name: &str, data: &[u8], mtime: DateTime<Utc>) {
        self.objects
            .lock()
            .insert(self.key(name), (data.to_vec(), mtime));
    }

    pub fn remove(&self, name: &str) {
        self.objects.lock().remove(&self.key(name));
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(&self.key(name)).map(|(d, _)| d.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().contains_key(&self.key(name))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Raw remote keys as stored, for prefix assertions.
    pub fn remote_keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn provider(&self) -> Provider {
        Provider::Aws
    }

    async fn authenticate(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FileEntry>, RemoteError> {
        let objects = self.objects.lock();
        let mut entries = Vec::new();
        for (key, (data, mtime)) in objects.iter() {
            let Some(name) = self.codec.remote_to_local(key) else {
                continue;
            };
            entries.push(FileEntry::remote(
                name,
                key.clone(),
                *mtime,
                data.len() as u64,
                md5_hex(data),
            ));
        }
        Ok(entries)
    }

    async fn read(&self, entry: &FileEntry) -> Result<Bytes, RemoteError> {
        let key = if entry.remote_name.is_empty() {
            self.key(&entry.name)
        } else {
            entry.remote_name.clone()
        };
        self.objects
            .lock()
            .get(&key)
            .map(|(d, _)| Bytes::from(d.clone()))
            .ok_or_else(|| RemoteError::NotFound(entry.name.clone()))
    }

    async fn write(&self, entry: &FileEntry, body: Bytes) -> Result<(), RemoteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 400,
                message: "injected write failure".to_string(),
            });
        }
        let key = if entry.remote_name.is_empty() {
            self.key(&entry.name)
        } else {
            entry.remote_name.clone()
        };
        self.objects.lock().insert(key, (body.to_vec(), Utc::now()));
        Ok(())
    }

    async fn delete(&self, entry: &FileEntry) -> Result<(), RemoteError> {
        let key = if entry.remote_name.is_empty() {
            self.key(&entry.name)
        } else {
            entry.remote_name.clone()
        };
        self.objects.lock().remove(&key);
        Ok(())
    }
}
