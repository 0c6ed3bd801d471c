//! Plan execution: sequential transfers, progress, cancellation
//!
//! Scenarios run one at a time per provider. The abort flag is consulted
//! before each scenario and again between the two I/O legs of a transfer;
//! cancellation is terminal and leaves the cache untouched, so the next
//! run re-plans from true post-partial state. The first scenario error
//! likewise aborts the remainder of the plan — completed scenarios are
//! not rolled back, which is safe by construction of the planner.

use crate::error::SyncError;
use crate::local::LocalStore;
use crate::merge::{merge, MergeOutcome};
use crate::remote::ObjectStore;
use crate::types::{Rule, Scenario};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-rule counters for one provider's plan.
#[derive(Debug, Default)]
pub struct Progress {
    planned: [usize; 5],
    done: [usize; 5],
}

fn rule_index(rule: Rule) -> usize {
    match rule {
        Rule::LocalToRemote => 0,
        Rule::RemoteToLocal => 1,
        Rule::DeleteLocal => 2,
        Rule::DeleteRemote => 3,
        Rule::DiffMerge => 4,
    }
}

impl Progress {
    /// Totals per rule are known up front from the plan.
    pub fn new(plan: &[Scenario]) -> Self {
        let mut progress = Self::default();
        for scenario in plan {
            progress.planned[rule_index(scenario.rule)] += 1;
        }
        progress
    }

    fn increment(&mut self, rule: Rule) {
        self.done[rule_index(rule)] += 1;
    }

    pub fn planned(&self, rule: Rule) -> usize {
        self.planned[rule_index(rule)]
    }

    pub fn done(&self, rule: Rule) -> usize {
        self.done[rule_index(rule)]
    }

    pub fn total_done(&self) -> usize {
        self.done.iter().sum()
    }

    /// Terminal summary line per rule with any planned work.
    pub fn summarize(&self, provider: &str) {
        for rule in Rule::ALL {
            let planned = self.planned(rule);
            if planned > 0 {
                info!(
                    "{}: {} {}/{} file(s)",
                    provider,
                    rule.label(),
                    self.done(rule),
                    planned
                );
            }
        }
    }
}

/// Drives one provider's plan against the local store and remote client.
pub struct Executor<'a> {
    store: &'a dyn ObjectStore,
    local: &'a LocalStore,
    /// Vault-wide write lock shared across concurrently syncing providers.
    vault_lock: &'a Mutex<()>,
    abort: &'a AtomicBool,
}

impl<'a> Executor<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        local: &'a LocalStore,
        vault_lock: &'a Mutex<()>,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            store,
            local,
            vault_lock,
            abort,
        }
    }

    fn check_abort(&self) -> Result<(), SyncError> {
        if self.abort.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run the plan to completion or first error.
    pub async fn run(&self, plan: &[Scenario], progress: &mut Progress) -> Result<(), SyncError> {
        for scenario in plan {
            self.check_abort()?;
            debug!(
                "{}: {} {}",
                self.store.provider(),
                scenario.rule.label(),
                scenario.name()
            );
            self.apply(scenario).await?;
            progress.increment(scenario.rule);
        }
        Ok(())
    }

    async fn apply(&self, scenario: &Scenario) -> Result<(), SyncError> {
        let provider = self.store.provider();
        match scenario.rule {
            Rule::LocalToRemote => {
                let entry = scenario
                    .local
                    .as_ref()
                    .expect("upload scenario without local side");
                let data = self.local.read(&entry.name).await?;
                self.check_abort()?;
                self.store
                    .write(entry, data)
                    .await
                    .map_err(|e| e.into_sync(provider))?;
            }
            Rule::RemoteToLocal => {
                let entry = scenario
                    .remote
                    .as_ref()
                    .expect("download scenario without remote side");
                let data = self
                    .store
                    .read(entry)
                    .await
                    .map_err(|e| e.into_sync(provider))?;
                self.check_abort()?;
                let _guard = self.vault_lock.lock().await;
                self.local
                    .write(&entry.name, &data, entry.last_modified)
                    .await?;
            }
            Rule::DeleteLocal => {
                let entry = scenario
                    .local
                    .as_ref()
                    .expect("local delete scenario without local side");
                let _guard = self.vault_lock.lock().await;
                self.local.delete(&entry.name).await?;
            }
            Rule::DeleteRemote => {
                let entry = scenario
                    .remote
                    .as_ref()
                    .expect("remote delete scenario without remote side");
                self.store
                    .delete(entry)
                    .await
                    .map_err(|e| e.into_sync(provider))?;
            }
            Rule::DiffMerge => {
                let local_entry = scenario
                    .local
                    .as_ref()
                    .expect("merge scenario without local side");
                let remote_entry = scenario
                    .remote
                    .as_ref()
                    .expect("merge scenario without remote side");

                let local_bytes = self.local.read(&local_entry.name).await?;
                let remote_bytes = self
                    .store
                    .read(remote_entry)
                    .await
                    .map_err(|e| e.into_sync(provider))?;
                self.check_abort()?;

                match merge(&local_bytes, &remote_bytes) {
                    MergeOutcome::Merged(merged) => {
                        let merged = bytes::Bytes::from(merged);
                        self.store
                            .write(remote_entry, merged.clone())
                            .await
                            .map_err(|e| e.into_sync(provider))?;
                        let _guard = self.vault_lock.lock().await;
                        self.local
                            .write(&local_entry.name, &merged, Utc::now())
                            .await?;
                    }
                    MergeOutcome::Binary => {
                        // Non-text on a diverged file: last-writer-wins
                        // toward the newer modification time.
                        warn!(
                            "{}: {} is not mergeable text, keeping the newer side",
                            provider,
                            local_entry.name
                        );
                        if local_entry.last_modified >= remote_entry.last_modified {
                            self.store
                                .write(remote_entry, local_bytes)
                                .await
                                .map_err(|e| e.into_sync(provider))?;
                        } else {
                            let _guard = self.vault_lock.lock().await;
                            self.local
                                .write(
                                    &local_entry.name,
                                    &remote_bytes,
                                    remote_entry.last_modified,
                                )
                                .await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileEntry;
    use std::path::PathBuf;

    fn scenario(rule: Rule) -> Scenario {
        Scenario {
            local: Some(FileEntry::local(
                "a.md".to_string(),
                PathBuf::from("/v/a.md"),
                Utc::now(),
                1,
                "x".to_string(),
            )),
            remote: None,
            rule,
        }
    }

    #[test]
    fn test_progress_counts_per_rule() {
        let plan = vec![
            scenario(Rule::LocalToRemote),
            scenario(Rule::LocalToRemote),
            scenario(Rule::DeleteLocal),
        ];
        let mut progress = Progress::new(&plan);
        assert_eq!(progress.planned(Rule::LocalToRemote), 2);
        assert_eq!(progress.planned(Rule::DeleteLocal), 1);
        assert_eq!(progress.planned(Rule::DiffMerge), 0);

        progress.increment(Rule::LocalToRemote);
        assert_eq!(progress.done(Rule::LocalToRemote), 1);
        assert_eq!(progress.total_done(), 1);
    }
}
