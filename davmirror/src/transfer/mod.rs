// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Owns every in-flight body download for one account, keyed by
//! [`ResourceId`]. See [`session`] for the cross-restart session identifier
//! and [`progress`] for the handle surfaced to callers while a transfer
//! runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::account::Account;
use crate::delegate::PasswordCallback;
use crate::remote::{self, RemoteClient};
use crate::store::{ResourceId, Store};

pub mod progress;
pub mod session;

pub use progress::Progress;
pub use session::SessionIdentifier;

/// Fired to every [`TransferLayer::subscribe`]r as a download's state
/// machine (see the module-level state table) advances.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    DidStart(ResourceId),
    DidFinish(ResourceId),
    DidCancel(ResourceId),
    DidFail(ResourceId, String),
}

struct Entry {
    progress: Progress,
}

/// Per-account background download manager. Cheap to clone; every clone
/// shares the same pending-transfer table and event stream.
pub struct TransferLayer<R> {
    account: Account,
    store: Store,
    remote: Arc<R>,
    staging_root: PathBuf,
    session: SessionIdentifier,
    pending: Mutex<HashMap<ResourceId, Entry>>,
    events: broadcast::Sender<TransferEvent>,
    password_delegate: Mutex<Option<PasswordCallback>>,
    accepting: AtomicBool,
}

impl<R: RemoteClient + 'static> TransferLayer<R> {
    /// `staging_root` holds in-progress downloads; completed bodies are
    /// handed to [`Store::move_file`], which owns their final location.
    ///
    /// Construction never re-attaches to pre-existing background transfers:
    /// this host has no such capability, so the contract is satisfied
    /// trivially (see `DESIGN.md`).
    pub fn new(account: Account, store: Store, remote: Arc<R>, staging_root: PathBuf, bundle_identifier: impl Into<String>) -> Arc<Self> {
        let session = SessionIdentifier::new(account.id.as_str().to_string(), bundle_identifier.into());
        let (events, _) = broadcast::channel(256);

        Arc::new(Self {
            account,
            store,
            remote,
            staging_root,
            session,
            pending: Mutex::new(HashMap::new()),
            events,
            password_delegate: Mutex::new(None),
            accepting: AtomicBool::new(true),
        })
    }

    pub fn session_identifier(&self) -> &SessionIdentifier {
        &self.session
    }

    pub fn set_password_delegate(&self, delegate: PasswordCallback) {
        *self.password_delegate.lock().expect("mutex") = Some(delegate);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    pub fn progress(&self, resource: &ResourceId) -> Option<Progress> {
        self.pending.lock().expect("mutex").get(resource).map(|e| e.progress.clone())
    }

    /// Schedules a download, or returns the in-flight transfer's progress
    /// handle if one is already running for `resource` (at-most-one
    /// in-flight transfer per [`ResourceId`]).
    pub fn download(self: &Arc<Self>, resource: ResourceId) -> Progress {
        let mut pending = self.pending.lock().expect("mutex");

        if let Some(existing) = pending.get(&resource) {
            return existing.progress.clone();
        }

        let progress = Progress::new();

        if !self.accepting.load(Ordering::SeqCst) {
            return progress;
        }

        pending.insert(resource.clone(), Entry { progress: progress.clone() });
        drop(pending);

        let _ = self.events.send(TransferEvent::DidStart(resource.clone()));

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(resource).await });

        progress
    }

    /// Cancels every in-flight transfer; each resolves with `DidCancel`.
    pub fn invalidate_and_cancel(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let pending = self.pending.lock().expect("mutex");
        for entry in pending.values() {
            entry.progress.cancel();
        }
    }

    /// Lets in-flight transfers run to completion but accepts no new ones.
    pub fn finish_tasks_and_invalidate(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// The engine never persists background transfer handles (no host
    /// platform support), so draining a foreign session's completion
    /// events is a no-op: the completion fires immediately.
    pub fn handle_events(&self, _session: &SessionIdentifier, completion: impl FnOnce()) {
        completion();
    }

    async fn run(self: Arc<Self>, resource: ResourceId) {
        let progress = match self.pending.lock().expect("mutex").get(&resource) {
            Some(entry) => entry.progress.clone(),
            None => return,
        };

        let dest = self.staging_root.join(staging_name(&resource));
        let mut password = None;

        let event = loop {
            let attempt = {
                let progress_for_cancel = progress.clone();
                let progress_for_ticks = progress.clone();
                let dest = dest.clone();
                let password = password.clone();
                tokio::select! {
                    biased;
                    _ = progress_for_cancel.cancelled() => Attempt::Cancelled,
                    result = self.remote.download(&self.account, &resource.path, &dest, password.as_deref(), move |p: remote::Progress| {
                        progress_for_ticks.record(p.completed, p.total);
                    }) => Attempt::Completed(result),
                }
            };

            match attempt {
                Attempt::Cancelled => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    break TransferEvent::DidCancel(resource.clone());
                }
                Attempt::Completed(Err(remote::Error::AuthenticationRequired)) if password.is_none() => {
                    let delegate = self.password_delegate.lock().expect("mutex").clone();
                    password = match delegate {
                        Some(cb) => cb(self.account.clone()).await,
                        None => None,
                    };
                    if password.is_none() {
                        break TransferEvent::DidCancel(resource.clone());
                    }
                }
                Attempt::Completed(Err(err)) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    break TransferEvent::DidFail(resource.clone(), err.to_string());
                }
                Attempt::Completed(Ok(outcome)) => {
                    break match self.store.move_file(&dest, &outcome.etag, &resource) {
                        Ok(_changes) => TransferEvent::DidFinish(resource.clone()),
                        Err(err) => TransferEvent::DidFail(resource.clone(), err.to_string()),
                    };
                }
            }
        };

        self.pending.lock().expect("mutex").remove(&resource);
        let _ = self.events.send(event);
    }
}

enum Attempt {
    Cancelled,
    Completed(Result<remote::DownloadOutcome, remote::Error>),
}

fn staging_name(resource: &ResourceId) -> String {
    format!("{}-{}", resource.account.as_str(), resource.path.storage_key().replace('\u{1}', "_"))
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("remote: {0}")]
    Remote(#[from] remote::Error),
    #[error("store: {0}")]
    Store(#[from] crate::store::Error),
    #[error("cancelled")]
    Cancelled,
}
