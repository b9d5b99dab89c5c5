// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! One node in an account's mirror tree, and the change sets the [`crate::store`]
//! emits for every mutation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::path::Path;

/// Last-known state of a locally cached resource body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Absent,
    Downloading,
    Present { local_path: PathBuf, stored_version: String },
}

impl FileState {
    pub fn is_present(&self) -> bool {
        matches!(self, FileState::Present { .. })
    }
}

/// One node in an account's mirror tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub path: Path,
    pub is_collection: bool,
    /// Opaque remote version token (etag). `""` for auto-materialized
    /// ancestors that have never been independently fetched.
    pub version: String,
    /// True when this node's subtree may be out of date.
    pub dirty: bool,
    pub updated: DateTime<Utc>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub file_state: FileState,
}

impl Resource {
    /// A freshly materialized ancestor: `dirty`, unversioned, no body.
    pub(crate) fn materialized_ancestor(path: Path, now: DateTime<Utc>) -> Self {
        Self {
            path,
            is_collection: true,
            version: String::new(),
            dirty: true,
            updated: now,
            content_type: None,
            content_length: None,
            modified: None,
            file_state: FileState::Absent,
        }
    }
}

/// Remote-supplied properties for a single resource, as parsed from a
/// PROPFIND response. `None` at the top level of [`crate::store::Store::update`]
/// means "this resource no longer exists".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfProperties {
    pub is_collection: bool,
    pub version: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

/// One level of children, keyed by path component. `None` at the call site
/// means "do not touch children" (the caller only refreshed this resource's
/// own properties).
pub type ChildProperties = BTreeMap<String, SelfProperties>;

/// The result of any property-tree mutation: two disjoint sets of resources
/// whose observable state changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserted_or_updated: Vec<Resource>,
    pub deleted: Vec<Resource>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted_or_updated.is_empty() && self.deleted.is_empty()
    }

    pub(crate) fn extend(&mut self, other: ChangeSet) {
        self.inserted_or_updated.extend(other.inserted_or_updated);
        self.deleted.extend(other.deleted);
    }

    /// Testable Property 7: every path mentioned appears in at most one set.
    pub fn assert_disjoint(&self) {
        use std::collections::HashSet;

        let updated: HashSet<_> = self.inserted_or_updated.iter().map(|r| &r.path).collect();
        let deleted: HashSet<_> = self.deleted.iter().map(|r| &r.path).collect();

        assert!(
            updated.is_disjoint(&deleted),
            "change set is not disjoint: {:?} appear in both sets",
            updated.intersection(&deleted).collect::<Vec<_>>()
        );
    }
}
