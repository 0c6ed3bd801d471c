//! Planner contract over the canonical scenario table
//!
//! Literal inputs: vault "notes", provider "aws", files a.md through f.md.
//! These pin the plan produced for each (local, remote, cache) triple;
//! the executed outcomes live in sync_test.rs.

mod common;

use common::MemoryStore;
use cloudsync::cache::SyncCache;
use cloudsync::reconcile::plan;
use cloudsync::remote::ObjectStore;
use cloudsync::types::{FileEntry, Provider, Rule};
use chrono::Utc;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

fn local(name: &str, md5: &str) -> FileEntry {
    FileEntry::local(
        name.to_string(),
        PathBuf::from(format!("/vault/{}", name)),
        Utc::now(),
        1,
        md5.to_string(),
    )
}

fn remote(name: &str, md5: &str) -> FileEntry {
    FileEntry::remote(
        name.to_string(),
        format!("notes/{}", name),
        Utc::now(),
        1,
        md5.to_string(),
    )
}

/// Cache seeded through its own commit path, like a real prior run.
fn seeded_cache(entries: &[(&str, &str)]) -> (TempDir, SyncCache) {
    let dir = tempdir().unwrap();
    let mut cache = SyncCache::open(dir.path(), Provider::Aws);
    if !entries.is_empty() {
        let listing: Vec<FileEntry> = entries.iter().map(|(n, m)| remote(n, m)).collect();
        cache.commit(&listing, Utc::now()).unwrap();
    }
    (dir, cache)
}

#[test]
fn scenario_1_first_upload() {
    let (_d, cache) = seeded_cache(&[]);
    let actions = plan(&[local("a.md", "X")], &[], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::LocalToRemote);
    assert_eq!(actions[0].name(), "a.md");
}

#[test]
fn scenario_2_first_download() {
    let (_d, cache) = seeded_cache(&[]);
    let actions = plan(&[], &[remote("b.md", "Y")], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::RemoteToLocal);
    assert_eq!(actions[0].name(), "b.md");
}

#[test]
fn scenario_3_local_delete_propagation() {
    let (_d, cache) = seeded_cache(&[("c.md", "Z")]);
    let actions = plan(&[], &[remote("c.md", "Z")], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::DeleteRemote);
    assert_eq!(actions[0].name(), "c.md");
}

#[test]
fn scenario_4_remote_delete_propagation() {
    let (_d, cache) = seeded_cache(&[("d.md", "W")]);
    let actions = plan(&[local("d.md", "W")], &[], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::DeleteLocal);
    assert_eq!(actions[0].name(), "d.md");
}

#[test]
fn scenario_5_unambiguous_local_edit() {
    let (_d, cache) = seeded_cache(&[("e.md", "X1")]);
    let actions = plan(&[local("e.md", "X2")], &[remote("e.md", "X1")], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::LocalToRemote);
}

#[test]
fn scenario_6_concurrent_edit_merges() {
    let (_d, cache) = seeded_cache(&[("f.md", "M0")]);
    let actions = plan(&[local("f.md", "M1")], &[remote("f.md", "M2")], &cache);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].rule, Rule::DiffMerge);
    assert!(actions[0].local.is_some());
    assert!(actions[0].remote.is_some());
}

#[tokio::test]
async fn planner_consumes_real_listing_names() {
    // The join key is the decoded name, not the stored key: a listing
    // produced by the store (prefix + percent-encoding applied) must meet
    // the local walk's plain names.
    let store = MemoryStore::new("notes");
    store.insert("daily/my note.md", b"body");
    let listing = store.list().await.unwrap();
    assert_eq!(listing[0].name, "daily/my note.md");
    assert_eq!(listing[0].remote_name, "notes/daily/my%20note.md");

    let (_d, cache) = seeded_cache(&[]);
    let actions = plan(
        &[local("daily/my note.md", common::md5_hex(b"body").as_str())],
        &listing,
        &cache,
    );
    assert!(actions.is_empty(), "same content must plan nothing");
}
