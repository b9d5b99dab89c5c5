// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resource Manager reconcile scenarios (S3-S4) plus the coalescing
//! contract of §4.2.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use davmirror::account::Account;
use davmirror::path::Path;
use davmirror::remote::{self, stub::StubClient, PropertiesResponse};
use davmirror::resource::SelfProperties;
use davmirror::resource_manager::ResourceManager;
use davmirror::store::Store;
use davmirror::transfer::TransferLayer;

fn tempdir_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("store.sqlite"), dir.path().join("bodies")).expect("open store");
    (dir, store)
}

fn account(store: &Store) -> Account {
    store
        .add_account("https://example.com/api/".parse().unwrap(), "romeo".into())
        .expect("add account")
}

fn leaf(version: &str) -> SelfProperties {
    SelfProperties {
        is_collection: false,
        version: version.into(),
        content_type: Some("application/pdf".into()),
        content_length: Some(4),
        modified: None,
    }
}

/// Scenario S4: the composed remote URL is exactly the base joined with
/// the path, with no trailing slash for a non-collection.
#[test]
fn s4_remote_url_composition() {
    let account = Account {
        id: davmirror::account::Id::new("ACC1").unwrap(),
        base_url: "https://example.com/api/".parse().unwrap(),
        username: "romeo".into(),
        label: None,
    };
    let path = Path::new(["a", "b", "c"].map(String::from)).unwrap();

    let url = remote::resolve_url(&account, &path, false);

    assert_eq!(url.as_str(), "https://example.com/api/a/b/c");
}

/// A 404-equivalent response deletes the local resource rather than
/// erroring.
#[tokio::test]
async fn not_found_response_deletes_locally() {
    let (_dir, store) = tempdir_store();
    let account = account(&store);

    store.update(&account.id, &Path::new(["gone".to_string()]).unwrap(), Some(leaf("1")), None).unwrap();

    let remote = Arc::new(StubClient::new());
    remote.set_properties(Path::new(["gone".to_string()]).unwrap(), PropertiesResponse::NotFound);

    let transfer = TransferLayer::new(account.clone(), store.clone(), Arc::clone(&remote), tempfile::tempdir().unwrap().into_path(), "test.bundle");
    let manager = ResourceManager::new(account.clone(), store.clone(), remote, transfer);

    let changes = manager.update_resource(Path::new(["gone".to_string()]).unwrap()).await.expect("reconcile");

    assert!(changes.inserted_or_updated.is_empty());
    assert!(!changes.deleted.is_empty());
    assert!(store.resource(&account.id, &Path::new(["gone".to_string()]).unwrap()).unwrap().is_none());
}

/// Reconciling a collection whose children include a fresh leaf schedules
/// exactly one download for it.
#[tokio::test]
async fn reconcile_schedules_download_for_new_leaf() {
    let (_dir, store) = tempdir_store();
    let account = account(&store);

    let mut children = BTreeMap::new();
    children.insert("doc.pdf".to_string(), leaf("1"));

    let remote = Arc::new(StubClient::new());
    remote.set_properties(
        Path::root(),
        PropertiesResponse::Found {
            self_properties: SelfProperties {
                is_collection: true,
                version: "root-v1".into(),
                content_type: None,
                content_length: None,
                modified: None,
            },
            children,
        },
    );
    remote.set_body(Path::new(["doc.pdf".to_string()]).unwrap(), "1", b"body".to_vec());

    let staging = tempfile::tempdir().unwrap().into_path();
    let transfer = TransferLayer::new(account.clone(), store.clone(), Arc::clone(&remote), staging, "test.bundle");
    let mut events = transfer.subscribe();
    let manager = ResourceManager::new(account.clone(), store.clone(), remote, Arc::clone(&transfer));

    manager.update_resource(Path::root()).await.expect("reconcile");

    let started = events.recv().await.expect("a download started");
    assert!(matches!(started, davmirror::transfer::TransferEvent::DidStart(_)));
}

struct CountingClient {
    calls: AtomicUsize,
    started: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

impl CountingClient {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            started: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        }
    }
}

impl remote::RemoteClient for CountingClient {
    async fn retrieve_properties(
        &self,
        _account: &Account,
        _path: &Path,
        _collection_hint: bool,
        _password: Option<&str>,
    ) -> Result<PropertiesResponse, remote::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;

        Ok(PropertiesResponse::Found {
            self_properties: leaf("1"),
            children: BTreeMap::new(),
        })
    }

    async fn download(
        &self,
        _account: &Account,
        _path: &Path,
        _dest: &FsPath,
        _password: Option<&str>,
        _on_progress: impl Fn(remote::Progress) + Send,
    ) -> Result<remote::DownloadOutcome, remote::Error> {
        unreachable!("not exercised by this test")
    }
}

/// §4.2 concurrency: a second `updateResource` for a path already in
/// flight coalesces onto the first instead of issuing its own remote
/// fetch, and both resolve with the same outcome.
#[tokio::test]
async fn concurrent_update_resource_coalesces() {
    let (_dir, store) = tempdir_store();
    let account = account(&store);

    let remote = Arc::new(CountingClient::new());
    let transfer = TransferLayer::new(account.clone(), store.clone(), Arc::clone(&remote), tempfile::tempdir().unwrap().into_path(), "test.bundle");
    let manager = ResourceManager::new(account.clone(), store.clone(), Arc::clone(&remote), transfer);

    let target = Path::new(["shared".to_string()]).unwrap();

    let first = spawn_owned(manager.update_resource(target.clone()));
    remote.started.notified().await;

    // The first reconcile is now blocked inside `retrieve_properties`. A
    // second request for the same path must coalesce onto it rather than
    // issuing a second fetch.
    let second = spawn_owned(manager.update_resource(target.clone()));

    remote.release.notify_one();

    let a = first.await.expect("join").expect("first reconcile");
    let b = second.await.expect("join").expect("second reconcile");

    assert_eq!(a.inserted_or_updated, b.inserted_or_updated);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
}

fn spawn_owned<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut)
}
