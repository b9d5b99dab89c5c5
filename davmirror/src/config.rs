// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Host-supplied configuration: where persisted state lives and how
//! background transfer sessions should be namespaced. This is deliberately
//! separate from the [`crate::store`]'s own SQLite-backed engine state —
//! `HostConfig` is the small amount of bootstrap data the engine needs
//! before it can even open a [`crate::store::Store`].

use std::path::PathBuf;

use config::Config;
use serde::{Deserialize, Serialize};

/// `directory` — root for all persisted state.
/// `bundle_identifier` — namespace for background transfer sessions.
/// `shared_container_identifier` — optional, passed through to the
/// transfer session unmodified; unused by this engine directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub directory: PathBuf,
    pub bundle_identifier: String,
    #[serde(default)]
    pub shared_container_identifier: Option<String>,
}

impl HostConfig {
    /// The engine keeps one property database for every account (foreign
    /// keys and cascading deletes give per-account isolation without the
    /// bookkeeping of one file per account).
    pub fn db_path(&self) -> PathBuf {
        self.directory.join("store.sqlite")
    }

    pub fn bodies_path(&self) -> PathBuf {
        self.directory.join("bodies")
    }

    pub fn staging_path(&self) -> PathBuf {
        self.directory.join("staging")
    }
}

impl Config for HostConfig {
    fn domain() -> String {
        "davmirror".into()
    }

    fn merge(self, other: Self) -> Self {
        Self {
            directory: other.directory,
            bundle_identifier: other.bundle_identifier,
            shared_container_identifier: other.shared_container_identifier.or(self.shared_container_identifier),
        }
    }
}

pub use config::{Manager, SaveError as Error};
