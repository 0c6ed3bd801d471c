//! Three-way reconciliation: (local, remote, cache) -> action plan
//!
//! A pure, deterministic join on the canonical `name`. The cache — the
//! fingerprint map from the last successful sync — disambiguates
//! direction: a file absent on one side either was never synced (transfer
//! it) or was deleted there after a sync (propagate the delete), and a
//! file changed on both sides since the cached digest goes to a merge.
//! An empty cache therefore forces every same-name hash mismatch into a
//! merge rather than guessing a direction and silently overwriting.

use crate::cache::SyncCache;
use crate::types::{FileEntry, Rule, Scenario};
use std::collections::HashMap;
use tracing::debug;

/// Produce the action plan. Output order follows the local listing, then
/// the remaining remote-only entries in listing order; every name in
/// L ∪ R appears at most once, and exactly once when the sides disagree.
pub fn plan(local: &[FileEntry], remote: &[FileEntry], cache: &SyncCache) -> Vec<Scenario> {
    let remote_by_name: HashMap<&str, &FileEntry> =
        remote.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut scenarios = Vec::new();

    for l in local {
        match remote_by_name.get(l.name.as_str()) {
            None => {
                // Absent remotely: never-synced files upload, previously
                // synced files were deleted remotely.
                let rule = if cache.contains(&l.name) {
                    Rule::DeleteLocal
                } else {
                    Rule::LocalToRemote
                };
                scenarios.push(Scenario {
                    local: Some(l.clone()),
                    remote: None,
                    rule,
                });
            }
            Some(r) => {
                if l.md5 == r.md5 {
                    continue;
                }
                let rule = match cache.digest(&l.name) {
                    Some(c) if c == r.md5 => Rule::LocalToRemote,
                    Some(c) if c == l.md5 => Rule::RemoteToLocal,
                    _ => Rule::DiffMerge,
                };
                scenarios.push(Scenario {
                    local: Some(l.clone()),
                    remote: Some((*r).clone()),
                    rule,
                });
            }
        }
    }

    let local_names: HashMap<&str, ()> = local.iter().map(|e| (e.name.as_str(), ())).collect();
    for r in remote {
        if local_names.contains_key(r.name.as_str()) {
            continue;
        }
        let rule = if cache.contains(&r.name) {
            Rule::DeleteRemote
        } else {
            Rule::RemoteToLocal
        };
        scenarios.push(Scenario {
            local: None,
            remote: Some(r.clone()),
            rule,
        });
    }

    debug!(
        "planned {} actions over {} local / {} remote files",
        scenarios.len(),
        local.len(),
        remote.len()
    );
    scenarios
}
