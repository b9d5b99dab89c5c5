// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! A configured remote endpoint.

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use url::Url;

/// Separator forbidden inside an [`Id`]; used by [`crate::transfer::session`]
/// to encode an account alongside a bundle identifier.
pub const SEPARATOR: &str = "::";

/// Stable, opaque identifier for an [`Account`]. Only constructible via
/// [`Id::new`], which enforces the separator invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();

        if id.contains(SEPARATOR) {
            return Err(Error::ForbiddenSeparator(id));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("account identifier {0:?} must not contain {SEPARATOR:?}")]
    ForbiddenSeparator(String),
}

/// A configured remote endpoint and its local mirror's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Id,
    pub base_url: Url,
    pub username: String,
    pub label: Option<String>,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{label} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}
