// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Crate-wide error aggregation. Each module keeps its own narrow `Error`
//! enum; this type exists only at the boundaries that need to report across
//! module lines (the CLI, the [`crate::service::Service`] facade).

use thiserror::Error;

use crate::{account, config, path, remote, resource_manager, service, store, transfer};

#[derive(Debug, Error)]
pub enum Error {
    #[error("store: {0}")]
    Store(#[from] store::Error),

    #[error("remote: {0}")]
    Remote(#[from] remote::Error),

    #[error("transfer: {0}")]
    Transfer(#[from] transfer::Error),

    #[error("reconcile: {0}")]
    Reconcile(#[from] resource_manager::Error),

    #[error("service: {0}")]
    Service(#[from] service::Error),

    #[error("config: {0}")]
    Config(#[from] config::Error),

    #[error("account: {0}")]
    Account(#[from] account::Error),

    #[error("path: {0}")]
    Path(#[from] path::Error),

    #[error("unknown account {0:?}")]
    UnknownAccount(String),
}
