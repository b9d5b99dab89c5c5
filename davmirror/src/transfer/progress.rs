// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! An immutable progress handle with a synchronous cancellation trigger,
//! shared between a transfer's driving task and anyone polling it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Shared, cheaply cloned handle to one transfer's progress and
/// cancellation flag.
#[derive(Debug, Clone)]
pub struct Progress(Arc<Inner>);

#[derive(Debug)]
struct Inner {
    completed: AtomicU64,
    total: AtomicU64,
    cancel_tx: watch::Sender<bool>,
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

impl Progress {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self(Arc::new(Inner {
            completed: AtomicU64::new(0),
            total: AtomicU64::new(UNKNOWN_TOTAL),
            cancel_tx,
        }))
    }

    pub(crate) fn record(&self, completed: u64, total: Option<u64>) {
        self.0.completed.store(completed, Ordering::Relaxed);
        if let Some(total) = total {
            self.0.total.store(total, Ordering::Relaxed);
        }
    }

    pub fn completed(&self) -> u64 {
        self.0.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Option<u64> {
        match self.0.total.load(Ordering::Relaxed) {
            UNKNOWN_TOTAL => None,
            total => Some(total),
        }
    }

    /// Synchronously transitions the owning transfer to a cancelled
    /// completion. The driving task races its download against
    /// [`Self::cancelled`] and observes this immediately.
    pub fn cancel(&self) {
        let _ = self.0.cancel_tx.send(true);
    }

    /// Resolves once [`Self::cancel`] has been called.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.0.cancel_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}
