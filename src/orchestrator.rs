//! Per-provider sync lifecycle and the embedding surface
//!
//! One `SyncRunner` owns a run: providers sync concurrently as tasks, each
//! against its own cache, while sharing the local store and a vault-wide
//! write lock. A provider's failure is reported but never aborts the
//! others. The cache is committed from the post-sync remote listing, and
//! only when the provider's plan completed without error.

use crate::cache::SyncCache;
use crate::config::Settings;
use crate::error::SyncError;
use crate::executor::{Executor, Progress};
use crate::local::LocalStore;
use crate::reconcile;
use crate::remote::{azure::AzureStore, gcs::GcsStore, s3::S3Store, ObjectStore};
use crate::types::Provider;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info};

/// Outcome of one provider's sync within a run.
pub struct ProviderReport {
    pub provider: Provider,
    pub duration: Duration,
    pub outcome: Result<Progress, SyncError>,
}

/// Owns one run's shared state; credentials are read once at construction
/// and never re-read mid-run.
pub struct SyncRunner {
    settings: Arc<Settings>,
    local: Arc<LocalStore>,
    vault_lock: Arc<Mutex<()>>,
    abort: Arc<AtomicBool>,
}

impl SyncRunner {
    pub fn new(settings: Settings) -> Result<Self, SyncError> {
        settings.validate()?;
        if !settings.vault_path.is_dir() {
            return Err(SyncError::Configuration(format!(
                "vault path {} is not a directory",
                settings.vault_path.display()
            )));
        }
        let local = Arc::new(LocalStore::new(
            settings.vault_path.clone(),
            &settings.sync_ignore,
        ));
        Ok(Self {
            settings: Arc::new(settings),
            local,
            vault_lock: Arc::new(Mutex::new(())),
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Request cooperative cancellation. In-flight requests complete and
    /// are discarded; no cache is committed for cancelled providers.
    pub fn cancel(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Authenticate against one provider without transferring anything.
    pub async fn test_connectivity(&self, provider: Provider) -> Result<(), SyncError> {
        let store = build_store(&self.settings, provider)?;
        store
            .authenticate()
            .await
            .map_err(|e| e.into_sync(provider))?;
        info!("{}: connectivity OK", provider);
        Ok(())
    }

    /// Sync every enabled provider. Providers run concurrently; each
    /// report carries its own success or failure.
    pub async fn run_sync(&self) -> Vec<ProviderReport> {
        let mut handles = Vec::new();
        for provider in self.settings.enabled_providers() {
            let settings = Arc::clone(&self.settings);
            let local = Arc::clone(&self.local);
            let vault_lock = Arc::clone(&self.vault_lock);
            let abort = Arc::clone(&self.abort);
            handles.push((
                provider,
                tokio::spawn(async move {
                    let started = Instant::now();
                    let outcome =
                        sync_provider(&settings, &local, &vault_lock, &abort, provider).await;
                    (started.elapsed(), outcome)
                }),
            ));
        }

        let mut reports = Vec::new();
        for (provider, handle) in handles {
            let (duration, outcome) = match handle.await {
                Ok(result) => result,
                Err(e) => (
                    Duration::ZERO,
                    Err(SyncError::Io(std::io::Error::other(format!(
                        "sync task failed: {}",
                        e
                    )))),
                ),
            };
            if let Err(ref e) = outcome {
                error!("{}: sync failed: {}", provider, e);
            }
            reports.push(ProviderReport {
                provider,
                duration,
                outcome,
            });
        }
        reports
    }
}

/// auth -> list -> reconcile -> execute -> commit, for one provider.
async fn sync_provider(
    settings: &Settings,
    local: &LocalStore,
    vault_lock: &Mutex<()>,
    abort: &AtomicBool,
    provider: Provider,
) -> Result<Progress, SyncError> {
    let store = build_store(settings, provider)?;
    store
        .authenticate()
        .await
        .map_err(|e| e.into_sync(provider))?;
    let mut cache = SyncCache::open(&settings.state_dir(), provider);
    sync_with_store(store.as_ref(), local, &mut cache, vault_lock, abort).await
}

/// The provider-agnostic lifecycle after authentication. Public so an
/// embedding host (or a test double) can drive a sync against any
/// `ObjectStore` implementation.
pub async fn sync_with_store(
    store: &dyn ObjectStore,
    local: &LocalStore,
    cache: &mut SyncCache,
    vault_lock: &Mutex<()>,
    abort: &AtomicBool,
) -> Result<Progress, SyncError> {
    let provider = store.provider();
    let remote = store.list().await.map_err(|e| e.into_sync(provider))?;
    if remote.is_empty() {
        // The sole authoritative "first run against a fresh remote"
        // signal: without the cache cleared, every local file would look
        // like a remote deletion.
        if !cache.is_empty() {
            info!("{}: empty vault prefix on remote, clearing cache", provider);
        }
        cache.clear()?;
    }

    let local_entries = local.list().await?;
    let plan = reconcile::plan(&local_entries, &remote, cache);
    info!(
        "{}: {} local, {} remote, {} action(s) planned",
        provider,
        local_entries.len(),
        remote.len(),
        plan.len()
    );

    let mut progress = Progress::new(&plan);
    let executor = Executor::new(store, local, vault_lock, abort);
    executor.run(&plan, &mut progress).await?;

    // Ground truth for the next run's diff is what the remote holds now.
    let post_sync = store.list().await.map_err(|e| e.into_sync(provider))?;
    cache.commit(&post_sync, Utc::now())?;

    progress.summarize(provider.as_str());
    info!("{}: sync complete", provider);
    Ok(progress)
}

fn build_store(
    settings: &Settings,
    provider: Provider,
) -> Result<Arc<dyn ObjectStore>, SyncError> {
    let vault = settings.vault_name();
    let missing = || {
        SyncError::Configuration(format!("provider {} is not configured", provider.as_str()))
    };
    let store: Arc<dyn ObjectStore> = match provider {
        Provider::Aws => {
            let aws = settings.aws.as_ref().ok_or_else(missing)?;
            Arc::new(S3Store::new(aws, &vault).map_err(|e| e.into_sync(provider))?)
        }
        Provider::Azure => {
            let azure = settings.azure.as_ref().ok_or_else(missing)?;
            Arc::new(AzureStore::new(azure, &vault).map_err(|e| e.into_sync(provider))?)
        }
        Provider::Gcp => {
            let gcp = settings.gcp.as_ref().ok_or_else(missing)?;
            Arc::new(GcsStore::new(gcp, &vault).map_err(|e| e.into_sync(provider))?)
        }
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AwsSettings;
    use tempfile::tempdir;

    fn settings(vault: &std::path::Path) -> Settings {
        Settings {
            vault_path: vault.to_path_buf(),
            cloud_vault_override: None,
            sync_ignore: Vec::new(),
            log_level: "info".to_string(),
            aws: Some(AwsSettings {
                enabled: true,
                access_key: "AKID".to_string(),
                secret_key: "SECRET".to_string(),
                bucket: "b".to_string(),
                region: "us-east-1".to_string(),
            }),
            azure: None,
            gcp: None,
        }
    }

    #[test]
    fn test_new_rejects_missing_vault() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = SyncRunner::new(settings(&missing));
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_cancel_sets_flag() {
        let dir = tempdir().unwrap();
        let runner = SyncRunner::new(settings(dir.path())).unwrap();
        assert!(!runner.is_cancelled());
        runner.cancel();
        assert!(runner.is_cancelled());
    }

    #[test]
    fn test_build_store_requires_provider_section() {
        let dir = tempdir().unwrap();
        let mut s = settings(dir.path());
        s.azure = None;
        let err = match build_store(&Arc::new(s), Provider::Azure) {
            Err(e) => e,
            Ok(_) => panic!("expected build_store to fail"),
        };
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
