// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

pub use self::account::{Account, Id as AccountId};
pub use self::error::Error;
pub use self::resource::{ChangeSet, FileState, Resource};
pub use self::service::Service;
pub use self::store::{ResourceId, Store};

pub mod account;
pub mod config;
pub mod delegate;
pub mod error;
pub mod path;
pub mod remote;
pub mod resource;
pub mod resource_manager;
pub mod service;
pub mod store;
pub mod transfer;
