// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Testable properties and literal scenarios against [`davmirror::store::Store`].

use std::collections::BTreeMap;

use davmirror::resource::{FileState, SelfProperties};
use davmirror::store::Store;
use davmirror::Account;

fn open() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("store.sqlite"), dir.path().join("bodies")).expect("open store");
    (dir, store)
}

fn account(store: &Store) -> Account {
    store
        .add_account("https://example.com/api/".parse().unwrap(), "romeo".into())
        .expect("add account")
}

fn path(components: &[&str]) -> davmirror::path::Path {
    davmirror::path::Path::new(components.iter().map(|c| c.to_string())).expect("valid path")
}

fn leaf(version: &str) -> SelfProperties {
    SelfProperties {
        is_collection: false,
        version: version.into(),
        content_type: Some("application/pdf".into()),
        content_length: Some(55555),
        modified: None,
    }
}

fn collection(version: &str) -> SelfProperties {
    SelfProperties {
        is_collection: true,
        version: version.into(),
        content_type: None,
        content_length: None,
        modified: None,
    }
}

/// Testable Property 1 + scenario S1: inserting a deep resource
/// materializes every ancestor, dirty and versionless.
#[test]
fn s1_insert_deep_resource_materializes_ancestors() {
    let (_dir, store) = open();
    let account = account(&store);

    let changes = store
        .update(&account.id, &path(&["a", "b", "c"]), Some(leaf("123")), None)
        .expect("update");
    changes.assert_disjoint();

    assert_eq!(changes.inserted_or_updated.len(), 4);

    for ancestor in [vec!["a"], vec!["a", "b"]] {
        let resource = store.resource(&account.id, &path(&ancestor)).unwrap().expect("ancestor exists");
        assert!(resource.is_collection);
        assert!(resource.dirty);
    }

    let leaf_resource = store.resource(&account.id, &path(&["a", "b", "c"])).unwrap().expect("leaf exists");
    assert!(!leaf_resource.is_collection);
    assert!(!leaf_resource.dirty);
    assert_eq!(leaf_resource.version, "123");
    assert_eq!(leaf_resource.content_length, Some(55555));

    let children = store.contents(&account.id, &path(&["a", "b"])).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].path, path(&["a", "b", "c"]));
}

/// Testable Property 3: writing identical properties twice is a no-op.
#[test]
fn s3_identical_write_is_idempotent() {
    let (_dir, store) = open();
    let account = account(&store);

    store.update(&account.id, &path(&["a"]), Some(leaf("1")), None).unwrap();
    let second = store.update(&account.id, &path(&["a"]), Some(leaf("1")), None).unwrap();

    assert!(second.is_empty());
}

/// Testable Property 2 + scenario S3: a collection -> leaf type change
/// prunes the entire previous subtree.
#[test]
fn type_change_prunes_descendants() {
    let (_dir, store) = open();
    let account = account(&store);

    store.update(&account.id, &path(&["a", "b", "c"]), Some(leaf("1")), None).unwrap();

    let changes = store.update(&account.id, &path(&["a", "b"]), Some(leaf("567")), None).unwrap();
    changes.assert_disjoint();

    assert!(store.resource(&account.id, &path(&["a", "b", "c"])).unwrap().is_none());
    assert!(store.contents(&account.id, &path(&["a", "b"])).unwrap().is_empty());

    let flipped = store.resource(&account.id, &path(&["a", "b"])).unwrap().unwrap();
    assert!(!flipped.is_collection);
    assert_eq!(flipped.version, "567");
}

/// Scenario S2: replacing a collection's children prunes anything not
/// listed and writes every listed child as an isolated update.
#[test]
fn s2_collection_replacement() {
    let (_dir, store) = open();
    let account = account(&store);

    store.update(&account.id, &path(&["a", "b", "c", "x", "y"]), Some(leaf("old")), None).unwrap();
    store.update(&account.id, &path(&["a", "b", "c", "3", "x"]), Some(leaf("old")), None).unwrap();

    let mut children = BTreeMap::new();
    children.insert("1".to_string(), collection("a"));
    children.insert("2".to_string(), leaf("b"));
    children.insert("3".to_string(), leaf("c"));

    let changes = store
        .update(&account.id, &path(&["a", "b", "c"]), Some(collection("123")), Some(children))
        .unwrap();
    changes.assert_disjoint();

    assert!(changes.inserted_or_updated.iter().any(|r| r.path == path(&["a", "b", "c"])));
    assert!(changes.inserted_or_updated.iter().any(|r| r.path == path(&["a", "b", "c", "1"])));
    assert!(changes.inserted_or_updated.iter().any(|r| r.path == path(&["a", "b", "c", "2"])));
    assert!(changes.inserted_or_updated.iter().any(|r| r.path == path(&["a", "b", "c", "3"])));
    assert!(!changes.deleted.is_empty());

    assert!(store.resource(&account.id, &path(&["a", "b", "c", "3", "x"])).unwrap().is_none());
    assert!(store.resource(&account.id, &path(&["a", "b", "c", "x"])).unwrap().is_none());
}

/// Testable Property 4: a new version on a non-collection invalidates the
/// cached body and removes the prior file from disk.
#[test]
fn version_change_invalidates_body() {
    let (dir, store) = open();
    let account = account(&store);

    store.update(&account.id, &path(&["f"]), Some(leaf("1")), None).unwrap();

    let source = dir.path().join("incoming");
    std::fs::write(&source, b"hello").unwrap();

    let resource_id = davmirror::store::ResourceId {
        account: account.id.clone(),
        path: path(&["f"]),
    };
    store.move_file(&source, "1", &resource_id).unwrap();

    let resource = store.resource(&account.id, &path(&["f"])).unwrap().unwrap();
    let FileState::Present { local_path, stored_version } = resource.file_state.clone() else {
        panic!("expected present file state, got {:?}", resource.file_state);
    };
    assert_eq!(stored_version, "1");
    assert!(local_path.exists());

    store.update(&account.id, &path(&["f"]), Some(leaf("2")), None).unwrap();

    let resource = store.resource(&account.id, &path(&["f"])).unwrap().unwrap();
    assert_eq!(resource.file_state, FileState::Absent);
    assert!(!local_path.exists());
}

/// `moveFile` with a stale version discards the incoming file and leaves
/// the resource untouched.
#[test]
fn move_file_rejects_stale_version() {
    let (dir, store) = open();
    let account = account(&store);

    store.update(&account.id, &path(&["f"]), Some(leaf("2")), None).unwrap();

    let source = dir.path().join("incoming");
    std::fs::write(&source, b"hello").unwrap();

    let resource_id = davmirror::store::ResourceId {
        account: account.id.clone(),
        path: path(&["f"]),
    };
    let changes = store.move_file(&source, "1", &resource_id).unwrap();

    assert!(changes.is_empty());
    assert!(!source.exists());
    let resource = store.resource(&account.id, &path(&["f"])).unwrap().unwrap();
    assert_eq!(resource.file_state, FileState::Absent);
}

/// Testable Property 6: removing an account cascades to its resources and
/// body files without touching other accounts.
#[test]
fn account_removal_is_isolated() {
    let (dir, store) = open();
    let account_a = account(&store);
    let account_b = store.add_account("https://example.com/other/".parse().unwrap(), "juliet".into()).unwrap();

    store.update(&account_a.id, &path(&["f"]), Some(leaf("1")), None).unwrap();
    store.update(&account_b.id, &path(&["g"]), Some(leaf("1")), None).unwrap();

    let source = dir.path().join("incoming");
    std::fs::write(&source, b"hello").unwrap();
    let resource_id = davmirror::store::ResourceId {
        account: account_a.id.clone(),
        path: path(&["f"]),
    };
    store.move_file(&source, "1", &resource_id).unwrap();
    let resource = store.resource(&account_a.id, &path(&["f"])).unwrap().unwrap();
    let FileState::Present { local_path, .. } = resource.file_state.clone() else {
        panic!("expected present");
    };

    store.remove_account(&account_a.id).unwrap();

    assert!(store.resource(&account_a.id, &path(&["f"])).unwrap().is_none());
    assert!(!local_path.exists());
    assert!(store.resource(&account_b.id, &path(&["g"])).unwrap().is_some());
}

/// Duplicate account registration is rejected.
#[test]
fn duplicate_account_conflicts() {
    let (_dir, store) = open();
    account(&store);

    let err = store.add_account("https://example.com/api/".parse().unwrap(), "romeo".into()).unwrap_err();
    assert!(matches!(err, davmirror::store::Error::Conflict));
}
