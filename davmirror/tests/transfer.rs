// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Transfer Layer state machine scenarios (S5, S6) and the at-most-one
//! in-flight transfer property.

use std::sync::Arc;

use davmirror::account::Account;
use davmirror::path::Path;
use davmirror::remote::stub::StubClient;
use davmirror::resource::{FileState, SelfProperties};
use davmirror::store::{ResourceId, Store};
use davmirror::transfer::{SessionIdentifier, TransferEvent, TransferLayer};

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

/// Scenario S5: encode/decode is a roundtrip, and malformed triples are
/// rejected rather than panicking.
#[test]
fn s5_session_identifier_roundtrip() {
    let id = SessionIdentifier::new("ACC1", "com.example.app");
    let encoded = id.to_string();

    assert_eq!(encoded, "download::ACC1::com.example.app");
    assert_eq!(SessionIdentifier::parse(&encoded), Some(id));
    assert_eq!(SessionIdentifier::parse("download::ACC1::"), None);
    assert_eq!(SessionIdentifier::parse("download::::x"), None);
}

/// Scenario S6: a successful download with an etag moves the body into
/// the Store and fires exactly one `DidFinish`.
#[tokio::test]
async fn s6_download_completion_writes_body() {
    let (dir, store) = tempdir_store();
    let account = account(&store);
    let path = Path::new(["doc.pdf".to_string()]).unwrap();

    store
        .update(
            &account.id,
            &path,
            Some(SelfProperties {
                is_collection: false,
                version: "123".into(),
                content_type: Some("application/pdf".into()),
                content_length: Some(4),
                modified: None,
            }),
            None,
        )
        .unwrap();

    let remote = Arc::new(StubClient::new());
    remote.set_body(path.clone(), "123", b"body".to_vec());

    let transfer = TransferLayer::new(account.clone(), store.clone(), remote, dir.path().join("staging"), "test.bundle");
    let mut events = transfer.subscribe();

    let resource_id = ResourceId {
        account: account.id.clone(),
        path: path.clone(),
    };

    transfer.download(resource_id);

    let event = events.recv().await.expect("an event");
    assert!(matches!(event, TransferEvent::DidStart(_)));
    let event = events.recv().await.expect("an event");
    assert!(matches!(event, TransferEvent::DidFinish(_)));

    let resource = store.resource(&account.id, &path).unwrap().unwrap();
    match resource.file_state {
        FileState::Present { local_path, stored_version } => {
            assert_eq!(stored_version, "123");
            assert_eq!(std::fs::read(local_path).unwrap(), b"body");
        }
        other => panic!("expected present, got {other:?}"),
    }
}

/// Testable Property 5: a second `download` for the same resource while
/// one is in flight is a no-op; only one `DidFinish` is ever emitted.
#[tokio::test]
async fn at_most_one_transfer_in_flight() {
    let (dir, store) = tempdir_store();
    let account = account(&store);
    let path = Path::new(["doc.pdf".to_string()]).unwrap();

    store
        .update(
            &account.id,
            &path,
            Some(SelfProperties {
                is_collection: false,
                version: "123".into(),
                content_type: None,
                content_length: Some(4),
                modified: None,
            }),
            None,
        )
        .unwrap();

    let remote = Arc::new(StubClient::new());
    remote.set_body(path.clone(), "123", b"body".to_vec());

    let transfer = TransferLayer::new(account.clone(), store.clone(), remote, dir.path().join("staging"), "test.bundle");
    let mut events = transfer.subscribe();

    let resource_id = ResourceId {
        account: account.id.clone(),
        path: path.clone(),
    };

    transfer.download(resource_id.clone());
    transfer.download(resource_id.clone());

    let mut starts = 0;
    let mut finishes = 0;
    while finishes == 0 {
        match events.recv().await.expect("an event") {
            TransferEvent::DidStart(_) => starts += 1,
            TransferEvent::DidFinish(_) => finishes += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(starts, 1);
    assert_eq!(finishes, 1);
}

/// No host background-session capability means `handle_events` resolves
/// its completion immediately, as §4.3's "Temporary sessions" conformance
/// path requires.
#[tokio::test]
async fn handle_events_completes_immediately() {
    let (dir, store) = tempdir_store();
    let account = account(&store);
    let remote = Arc::new(StubClient::new());

    let transfer = TransferLayer::new(account, store, remote, dir.path().join("staging"), "test.bundle");

    let session = SessionIdentifier::new("ACC1", "other.bundle");
    let (tx, rx) = tokio::sync::oneshot::channel();
    transfer.handle_events(&session, move || {
        let _ = tx.send(());
    });

    rx.await.expect("completion invoked");
}
