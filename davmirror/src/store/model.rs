// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Row <-> domain type conversions for the [`super::Store`].

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::account::{self, Account};
use crate::path::Path;
use crate::resource::{FileState, Resource};

use super::{schema::accounts, schema::resources, Error};

pub(super) fn now_secs(now: DateTime<Utc>) -> i64 {
    now.timestamp()
}

pub(super) fn from_secs(value: i64) -> Result<DateTime<Utc>, Error> {
    Ok(
        NaiveDateTime::from_timestamp_opt(value, 0)
            .ok_or(Error::InvalidTimestamp(value))?
            .and_utc(),
    )
}

fn opt_from_secs(value: Option<i64>) -> Result<Option<DateTime<Utc>>, Error> {
    value.map(from_secs).transpose()
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = accounts, primary_key(id), check_for_backend(diesel::sqlite::Sqlite))]
pub(super) struct AccountRow {
    pub id: String,
    pub base_url: String,
    pub username: String,
    pub label: Option<String>,
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = accounts)]
pub(super) struct NewAccountRow<'a> {
    pub id: &'a str,
    pub base_url: &'a str,
    pub username: &'a str,
    pub label: Option<&'a str>,
    pub created_at: i64,
}

impl AccountRow {
    pub fn into_account(self) -> Result<Account, Error> {
        Ok(Account {
            id: account::Id::new(self.id).map_err(|e| Error::InvalidAccount(e.to_string()))?,
            base_url: self.base_url.parse().map_err(|_| Error::InvalidAccount("bad base url".into()))?,
            username: self.username,
            label: self.label,
        })
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = resources, primary_key(account_id, path_key), check_for_backend(diesel::sqlite::Sqlite))]
pub(super) struct ResourceRow {
    pub account_id: String,
    pub path_key: String,
    pub parent_key: Option<String>,
    pub depth: i32,
    pub is_collection: bool,
    pub version: String,
    pub dirty: bool,
    pub updated: i64,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub modified: Option<i64>,
    pub file_state: String,
    pub local_path: Option<String>,
    pub stored_version: Option<String>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = resources)]
pub(super) struct NewResourceRow {
    pub account_id: String,
    pub path_key: String,
    pub parent_key: Option<String>,
    pub depth: i32,
    pub is_collection: bool,
    pub version: String,
    pub dirty: bool,
    pub updated: i64,
    pub content_type: Option<String>,
    pub content_length: Option<i64>,
    pub modified: Option<i64>,
    pub file_state: String,
    pub local_path: Option<String>,
    pub stored_version: Option<String>,
}

impl ResourceRow {
    pub fn into_resource(self) -> Result<Resource, Error> {
        let file_state = match self.file_state.as_str() {
            "absent" => FileState::Absent,
            "downloading" => FileState::Downloading,
            "present" => {
                let local_path = self.local_path.ok_or(Error::CorruptFileState)?;
                let stored_version = self.stored_version.ok_or(Error::CorruptFileState)?;
                FileState::Present {
                    local_path: local_path.into(),
                    stored_version,
                }
            }
            _ => return Err(Error::CorruptFileState),
        };

        Ok(Resource {
            path: Path::from_storage_key(&self.path_key),
            is_collection: self.is_collection,
            version: self.version,
            dirty: self.dirty,
            updated: from_secs(self.updated)?,
            content_type: self.content_type,
            content_length: self.content_length.map(|v| v as u64),
            modified: opt_from_secs(self.modified)?,
            file_state,
        })
    }
}

pub(super) fn new_row(account_id: &account::Id, resource: &Resource) -> NewResourceRow {
    let (file_state, local_path, stored_version) = match &resource.file_state {
        FileState::Absent => ("absent".to_string(), None, None),
        FileState::Downloading => ("downloading".to_string(), None, None),
        FileState::Present { local_path, stored_version } => (
            "present".to_string(),
            Some(local_path.to_string_lossy().into_owned()),
            Some(stored_version.clone()),
        ),
    };

    NewResourceRow {
        account_id: account_id.as_str().to_string(),
        path_key: resource.path.storage_key(),
        parent_key: resource.path.parent().map(|p| p.storage_key()),
        depth: resource.path.depth() as i32,
        is_collection: resource.is_collection,
        version: resource.version.clone(),
        dirty: resource.dirty,
        updated: now_secs(resource.updated),
        content_type: resource.content_type.clone(),
        content_length: resource.content_length.map(|v| v as i64),
        modified: resource.modified.map(now_secs),
        file_state,
        local_path,
        stored_version,
    }
}
