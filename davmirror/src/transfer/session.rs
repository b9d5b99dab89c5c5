// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The stable wire encoding for a transfer session, so a host can re-attach
//! the engine to a still-running background session across a process
//! restart using only this string.

use std::fmt;

use thiserror::Error;

const PREFIX: &str = "download";
const SEPARATOR: &str = "::";

/// `download::<accountID>::<bundleIdentifier>`, parsed defensively: every
/// component must be present, non-empty, and free of stray separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentifier {
    pub account_id: String,
    pub bundle_identifier: String,
}

impl SessionIdentifier {
    pub fn new(account_id: impl Into<String>, bundle_identifier: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            bundle_identifier: bundle_identifier.into(),
        }
    }

    /// Parses a session identifier this process did not necessarily create
    /// (a sibling process in the same app suite may own it). Malformed
    /// input is rejected rather than panicking.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(SEPARATOR);

        let prefix = parts.next()?;
        if prefix != PREFIX {
            return None;
        }

        let account_id = parts.next()?;
        let bundle_identifier = parts.next()?;

        if parts.next().is_some() {
            return None;
        }

        if account_id.is_empty() || bundle_identifier.is_empty() {
            return None;
        }

        Some(Self {
            account_id: account_id.to_string(),
            bundle_identifier: bundle_identifier.to_string(),
        })
    }
}

impl fmt::Display for SessionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{SEPARATOR}{}{SEPARATOR}{}", self.account_id, self.bundle_identifier)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed session identifier")]
    Malformed,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let id = SessionIdentifier::new("ACC1", "com.example.app");
        let encoded = id.to_string();
        assert_eq!(encoded, "download::ACC1::com.example.app");
        assert_eq!(SessionIdentifier::parse(&encoded), Some(id));
    }

    #[test]
    fn rejects_missing_bundle_identifier() {
        assert_eq!(SessionIdentifier::parse("download::ACC1::"), None);
    }

    #[test]
    fn rejects_missing_account_id() {
        assert_eq!(SessionIdentifier::parse("download::::x"), None);
    }

    #[test]
    fn rejects_extra_components() {
        assert_eq!(SessionIdentifier::parse("download::ACC1::com.example.app::extra"), None);
    }
}
