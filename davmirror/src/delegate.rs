// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Upward-facing callback handles. The engine never owns credentials or a
//! notification fan-out policy; it only ever asks, through these, and the
//! host answers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::account::Account;

/// Asked by a [`crate::resource_manager::ResourceManager`] (by way of a
/// [`crate::transfer::TransferLayer`] auth challenge) whenever the remote
/// responds 401. Returning `None` is treated as a decline, which cancels
/// the requesting transfer.
pub type PasswordCallback = Arc<dyn Fn(Account) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync>;
