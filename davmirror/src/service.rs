// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Process-wide entry point: the account registry, one lazily created
//! [`ResourceManager`]/[`TransferLayer`] pair per account, and the
//! notification fan-out described in the module's design notes (an
//! explicit event channel in place of a shared dispatch queue).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

use crate::account::{self, Account};
use crate::config::HostConfig;
use crate::delegate::PasswordCallback;
use crate::path::Path;
use crate::remote::RemoteClient;
use crate::resource::ChangeSet;
use crate::resource_manager::{self, ResourceManager};
use crate::store::{self, Store};
use crate::transfer::TransferLayer;

/// Published to every [`Service::subscribe`]r. Delivered on whatever task
/// polls the receiver — the "main domain" is the host's responsibility.
#[derive(Debug, Clone)]
pub enum Event {
    AccountAdded(Account),
    AccountUpdated(Account),
    AccountRemoved(account::Id),
    ResourcesChanged { account: account::Id, changes: ChangeSet },
}

struct Managed<R> {
    manager: Arc<ResourceManager<R>>,
    transfer: Arc<TransferLayer<R>>,
}

/// Process-wide façade. Cheap to clone (an `Arc` everywhere inside); the
/// host is expected to keep exactly one around for the process lifetime.
pub struct Service<R> {
    store: Store,
    remote: Arc<R>,
    config: HostConfig,
    managed: Mutex<HashMap<account::Id, Managed<R>>>,
    events: broadcast::Sender<Event>,
    password_delegate: Mutex<Option<PasswordCallback>>,
}

impl<R: RemoteClient + 'static> Service<R> {
    /// Opens the shared [`Store`] under `config.directory` and returns a
    /// façade with no managers yet created; they come into being lazily on
    /// first [`Service::update_resource`] for an account.
    pub fn open(config: HostConfig, remote: Arc<R>) -> Result<Arc<Self>, Error> {
        let store = Store::open(config.db_path(), config.bodies_path())?;
        let (events, _) = broadcast::channel(256);

        Ok(Arc::new(Self {
            store,
            remote,
            config,
            managed: Mutex::new(HashMap::new()),
            events,
            password_delegate: Mutex::new(None),
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Installed once; every manager created after this point (and every
    /// manager already created) asks it when the remote challenges for
    /// credentials. If never installed, challenges resolve to "no
    /// credential", which the Transfer Layer treats as a cancel.
    pub fn set_password_delegate(&self, delegate: PasswordCallback) {
        for entry in self.managed.lock().expect("mutex").values() {
            entry.manager.set_password_delegate(Arc::clone(&delegate));
            entry.transfer.set_password_delegate(Arc::clone(&delegate));
        }
        *self.password_delegate.lock().expect("mutex") = Some(delegate);
    }

    pub fn accounts(&self) -> Result<Vec<Account>, Error> {
        Ok(self.store.accounts()?)
    }

    pub fn add_account(&self, base_url: Url, username: String) -> Result<Account, Error> {
        let account = self.store.add_account(base_url, username)?;
        let _ = self.events.send(Event::AccountAdded(account.clone()));
        Ok(account)
    }

    pub fn update_account(&self, id: &account::Id, label: Option<String>) -> Result<Account, Error> {
        let account = self.store.update_account(id, label)?;
        let _ = self.events.send(Event::AccountUpdated(account.clone()));
        Ok(account)
    }

    /// Cascades to every resource, pending transfer, and cached body of
    /// `id`, and drops its manager/transfer pair if one was ever created.
    pub fn remove_account(&self, id: &account::Id) -> Result<(), Error> {
        self.store.remove_account(id)?;
        if let Some(entry) = self.managed.lock().expect("mutex").remove(id) {
            entry.transfer.invalidate_and_cancel();
        }
        let _ = self.events.send(Event::AccountRemoved(id.clone()));
        Ok(())
    }

    /// Reconciles `path` for `account`, lazily creating its manager and
    /// transfer layer on first use. The resulting change set is fanned out
    /// to subscribers by the `on_change` callback wired in [`Self::manager_for`],
    /// not here, so a single reconcile never emits `ResourcesChanged` twice.
    pub async fn update_resource(self: &Arc<Self>, account: account::Id, path: Path) -> Result<ChangeSet, Error> {
        let managed = self.manager_for(&account)?;
        managed.manager.update_resource(path).await.map_err(Error::Reconcile)
    }

    pub fn transfer_progress(&self, account: &account::Id, resource: &Path) -> Option<crate::transfer::Progress> {
        let managed = self.managed.lock().expect("mutex").get(account)?.transfer.clone();
        managed.progress(&store::ResourceId {
            account: account.clone(),
            path: resource.clone(),
        })
    }

    /// Directly schedules a body download for `path`, bypassing reconcile.
    /// Used by the CLI's `sync download` demo subcommand; the normal path
    /// to a download is always through [`Self::update_resource`]'s §4.2
    /// step 5, not this.
    pub fn download_resource(self: &Arc<Self>, account: account::Id, path: Path) -> Result<crate::transfer::Progress, Error> {
        let managed = self.manager_for(&account)?;
        Ok(managed.transfer.download(store::ResourceId { account, path }))
    }

    pub fn subscribe_transfer(&self, account: &account::Id) -> Option<broadcast::Receiver<crate::transfer::TransferEvent>> {
        Some(self.managed.lock().expect("mutex").get(account)?.transfer.subscribe())
    }

    fn manager_for(self: &Arc<Self>, account: &account::Id) -> Result<Arc<Managed<R>>, Error> {
        let mut managed = self.managed.lock().expect("mutex");

        if let Some(entry) = managed.get(account) {
            return Ok(Arc::new(Managed {
                manager: Arc::clone(&entry.manager),
                transfer: Arc::clone(&entry.transfer),
            }));
        }

        let accounts = self.store.accounts()?;
        let account_record = accounts.into_iter().find(|a| &a.id == account).ok_or_else(|| Error::UnknownAccount(account.clone()))?;

        let transfer = TransferLayer::new(
            account_record.clone(),
            self.store.clone(),
            Arc::clone(&self.remote),
            self.config.staging_path(),
            self.config.bundle_identifier.clone(),
        );
        let manager = ResourceManager::new(account_record, self.store.clone(), Arc::clone(&self.remote), Arc::clone(&transfer));

        if let Some(delegate) = self.password_delegate.lock().expect("mutex").clone() {
            manager.set_password_delegate(Arc::clone(&delegate));
            transfer.set_password_delegate(delegate);
        }

        let events = self.events.clone();
        let account_for_callback = account.clone();
        manager.set_on_change(move |changes| {
            let _ = events.send(Event::ResourcesChanged {
                account: account_for_callback.clone(),
                changes,
            });
        });

        managed.insert(
            account.clone(),
            Managed {
                manager: Arc::clone(&manager),
                transfer: Arc::clone(&transfer),
            },
        );

        Ok(Arc::new(Managed { manager, transfer }))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] store::Error),
    #[error("reconcile: {0}")]
    Reconcile(Arc<resource_manager::Error>),
    #[error("unknown account {0}")]
    UnknownAccount(account::Id),
}
