// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-account reconciler: drives the [`crate::store::Store`] toward
//! consistency with the remote and schedules bodies via the
//! [`crate::transfer::TransferLayer`]. Exactly one instance exists per
//! account, owned by the [`crate::service::Service`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

use crate::account::Account;
use crate::delegate::PasswordCallback;
use crate::path::Path;
use crate::remote::{self, PropertiesResponse, RemoteClient};
use crate::resource::ChangeSet;
use crate::store::{self, ResourceId, Store};
use crate::transfer::TransferLayer;

type SharedReconcile = Shared<BoxFuture<'static, Result<ChangeSet, Arc<Error>>>>;

/// Per-account reconciler. See the module documentation.
pub struct ResourceManager<R> {
    account: Account,
    store: Store,
    remote: Arc<R>,
    transfer: Arc<TransferLayer<R>>,
    inflight: Mutex<HashMap<Path, SharedReconcile>>,
    on_change: Mutex<Option<Arc<dyn Fn(ChangeSet) + Send + Sync>>>,
    password_delegate: Mutex<Option<PasswordCallback>>,
}

impl<R: RemoteClient + 'static> ResourceManager<R> {
    pub fn new(account: Account, store: Store, remote: Arc<R>, transfer: Arc<TransferLayer<R>>) -> Arc<Self> {
        Arc::new(Self {
            account,
            store,
            remote,
            transfer,
            inflight: Mutex::new(HashMap::new()),
            on_change: Mutex::new(None),
            password_delegate: Mutex::new(None),
        })
    }

    /// Installed by the [`crate::service::Service`] facade; called with
    /// every externally observable change set this manager produces.
    pub fn set_on_change(&self, callback: impl Fn(ChangeSet) + Send + Sync + 'static) {
        *self.on_change.lock().expect("mutex") = Some(Arc::new(callback));
    }

    pub fn set_password_delegate(&self, delegate: PasswordCallback) {
        *self.password_delegate.lock().expect("mutex") = Some(delegate);
    }

    /// Reconciles the subtree rooted at `path` against the remote. A second
    /// call for the same path that arrives while the first is still in
    /// flight coalesces onto it: both resolve with the same outcome.
    pub fn update_resource(self: &Arc<Self>, path: Path) -> impl Future<Output = Result<ChangeSet, Arc<Error>>> + 'static {
        let shared = {
            let mut inflight = self.inflight.lock().expect("mutex");

            if let Some(existing) = inflight.get(&path) {
                existing.clone()
            } else {
                let this = Arc::clone(self);
                let target = path.clone();
                let fut: BoxFuture<'static, Result<ChangeSet, Arc<Error>>> =
                    Box::pin(async move { this.reconcile(target).await.map_err(Arc::new) });
                let shared = fut.shared();
                inflight.insert(path.clone(), shared.clone());
                shared
            }
        };

        let this = Arc::clone(self);
        async move {
            let result = shared.await;
            this.inflight.lock().expect("mutex").remove(&path);
            result
        }
    }

    async fn reconcile(&self, path: Path) -> Result<ChangeSet, Error> {
        let local = self.store.resource(&self.account.id, &path)?;
        let collection_hint = local.as_ref().map(|r| r.is_collection).unwrap_or(true);

        let response = self.fetch_properties(&path, collection_hint).await?;

        let changes = match response {
            PropertiesResponse::NotFound => self.store.update(&self.account.id, &path, None, None)?,
            PropertiesResponse::Found { self_properties, children } => {
                self.store.update(&self.account.id, &path, Some(self_properties), Some(children))?
            }
        };

        self.emit(&changes);
        self.schedule_downloads(&changes);

        Ok(changes)
    }

    async fn fetch_properties(&self, path: &Path, collection_hint: bool) -> Result<PropertiesResponse, Error> {
        let mut password = None;

        loop {
            match self.remote.retrieve_properties(&self.account, path, collection_hint, password.as_deref()).await {
                Ok(response) => return Ok(response),
                Err(remote::Error::AuthenticationRequired) if password.is_none() => {
                    let delegate = self.password_delegate.lock().expect("mutex").clone();
                    password = match delegate {
                        Some(callback) => callback(self.account.clone()).await,
                        None => None,
                    };
                    if password.is_none() {
                        return Err(Error::AuthenticationDeclined);
                    }
                }
                Err(err) => return Err(Error::Remote(err)),
            }
        }
    }

    fn emit(&self, changes: &ChangeSet) {
        if let Some(callback) = self.on_change.lock().expect("mutex").clone() {
            callback(changes.clone());
        }
    }

    /// §4.2 step 5: any non-collection resource that's new, stale, or not
    /// yet materialized on disk is handed to the Transfer Layer.
    fn schedule_downloads(&self, changes: &ChangeSet) {
        for resource in &changes.inserted_or_updated {
            if resource.is_collection {
                continue;
            }

            let up_to_date = matches!(
                &resource.file_state,
                crate::resource::FileState::Present { stored_version, .. } if *stored_version == resource.version
            );

            if !up_to_date {
                self.transfer.download(ResourceId {
                    account: self.account.id.clone(),
                    path: resource.path.clone(),
                });
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] store::Error),
    #[error("remote: {0}")]
    Remote(#[from] remote::Error),
    #[error("authentication declined")]
    AuthenticationDeclined,
}
