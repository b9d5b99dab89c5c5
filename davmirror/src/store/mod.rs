// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Durable, single-writer, multi-reader storage of accounts and their
//! resource trees. Every public mutator either commits atomically and
//! returns a [`ChangeSet`], or fails without effect.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use diesel::connection::SimpleConnection as _;
use diesel::prelude::*;
use diesel::{Connection as _, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::account::{self, Account};
use crate::path::Path;
use crate::resource::{ChangeSet, ChildProperties, FileState, Resource, SelfProperties};

mod model;
mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/store/migrations");

/// Primary key of a resource: the pair (account identifier, path).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub account: account::Id,
    pub path: Path,
}

#[derive(Clone)]
struct Connection(Arc<Mutex<SqliteConnection>>);

impl Connection {
    fn new(conn: SqliteConnection) -> Self {
        Self(Arc::new(Mutex::new(conn)))
    }

    fn exec<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> T) -> T {
        let mut guard = self.0.lock().expect("mutex guard");
        f(&mut guard)
    }

    /// Run `f` inside a single SQLite transaction. Either every write in `f`
    /// commits, or none do.
    fn exclusive_tx<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> Result<T, Error>) -> Result<T, Error> {
        self.exec(|conn| conn.transaction(f))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

/// Durable local mirror of every configured account's resource tree.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Connection,
    /// Root directory under which downloaded bodies are placed by
    /// [`Store::move_file`]. Never written to by any other component.
    bodies_root: PathBuf,
}

impl Store {
    /// Open (creating if absent) the resource database at `db_path`, storing
    /// downloaded bodies under `bodies_root`. Idempotent.
    pub fn open(db_path: impl AsRef<FsPath>, bodies_root: impl Into<PathBuf>) -> Result<Self, Error> {
        if let Some(parent) = db_path.as_ref().parent() {
            fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        let mut conn = SqliteConnection::establish(&db_path.as_ref().to_string_lossy())?;
        conn.batch_execute("PRAGMA foreign_keys = ON;")?;
        conn.run_pending_migrations(MIGRATIONS).map_err(Error::Migration)?;

        let bodies_root = bodies_root.into();
        fs::create_dir_all(&bodies_root).map_err(Error::Io)?;

        Ok(Self {
            conn: Connection::new(conn),
            bodies_root,
        })
    }

    /// Register a new account. Fails with [`Error::Conflict`] if one already
    /// exists with the same `(base_url, username)`.
    pub fn add_account(&self, base_url: url::Url, username: String) -> Result<Account, Error> {
        use schema::accounts::dsl as a;

        self.conn.exclusive_tx(|tx| {
            let exists = a::accounts
                .filter(a::base_url.eq(base_url.as_str()))
                .filter(a::username.eq(&username))
                .count()
                .get_result::<i64>(tx)?
                > 0;

            if exists {
                return Err(Error::Conflict);
            }

            let id = account::Id::new(uuid_like_id()).expect("generated id has no separator");
            let created_at = Utc::now().timestamp();

            diesel::insert_into(a::accounts)
                .values(model::NewAccountRow {
                    id: id.as_str(),
                    base_url: base_url.as_str(),
                    username: &username,
                    label: None,
                    created_at,
                })
                .execute(tx)?;

            Ok(Account {
                id,
                base_url,
                username,
                label: None,
            })
        })
    }

    /// Update an account's human label.
    pub fn update_account(&self, id: &account::Id, label: Option<String>) -> Result<Account, Error> {
        use schema::accounts::dsl as a;

        self.conn.exclusive_tx(|tx| {
            let row = a::accounts
                .filter(a::id.eq(id.as_str()))
                .select(model::AccountRow::as_select())
                .first(tx)
                .optional()?
                .ok_or(Error::UnknownAccount)?;

            diesel::update(a::accounts.filter(a::id.eq(id.as_str())))
                .set(a::label.eq(&label))
                .execute(tx)?;

            let mut account = row.into_account()?;
            account.label = label;
            Ok(account)
        })
    }

    /// Remove an account, cascading to every resource it owns and every
    /// cached body file on disk.
    pub fn remove_account(&self, id: &account::Id) -> Result<(), Error> {
        use schema::accounts::dsl as a;
        use schema::resources::dsl as r;

        let bodies = self.conn.exclusive_tx(|tx| {
            let rows = r::resources
                .filter(r::account_id.eq(id.as_str()))
                .select(model::ResourceRow::as_select())
                .load(tx)?;

            let bodies = rows
                .into_iter()
                .map(model::ResourceRow::into_resource)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter_map(|r| match r.file_state {
                    FileState::Present { local_path, .. } => Some(local_path),
                    _ => None,
                })
                .collect::<Vec<_>>();

            let deleted = diesel::delete(a::accounts.filter(a::id.eq(id.as_str()))).execute(tx)?;
            if deleted == 0 {
                return Err(Error::UnknownAccount);
            }

            Ok(bodies)
        })?;

        for path in bodies {
            let _ = fs::remove_file(path);
        }

        Ok(())
    }

    /// All accounts, in the order they were added.
    pub fn accounts(&self) -> Result<Vec<Account>, Error> {
        use schema::accounts::dsl as a;

        self.conn.exec(|tx| {
            a::accounts
                .select(model::AccountRow::as_select())
                .order(a::created_at.asc())
                .load(tx)?
                .into_iter()
                .map(model::AccountRow::into_account)
                .collect()
        })
    }

    /// The resource at `path`, if any.
    pub fn resource(&self, account: &account::Id, path: &Path) -> Result<Option<Resource>, Error> {
        self.conn.exec(|tx| load_resource(tx, account, path))
    }

    /// The immediate children of `path`: the resources whose paths are
    /// `path` extended by exactly one component.
    pub fn contents(&self, account: &account::Id, path: &Path) -> Result<Vec<Resource>, Error> {
        self.conn.exec(|tx| load_children(tx, account, path))
    }

    /// The central mutator: write `self_properties` (or delete, if `None`)
    /// at `path`, optionally replacing its children, and return the
    /// resulting change set. See `SPEC_FULL.md` §4.1 for the full algorithm.
    pub fn update(
        &self,
        account: &account::Id,
        path: &Path,
        self_properties: Option<SelfProperties>,
        children: Option<ChildProperties>,
    ) -> Result<ChangeSet, Error> {
        if !account_path_valid(path) {
            return Err(Error::InvalidArgument("path contains an empty component".into()));
        }

        let now = Utc::now();
        let mut pending_file_removals = Vec::new();

        let changes = self.conn.exclusive_tx(|tx| {
            ensure_account_exists(tx, account)?;

            let mut changes = ChangeSet::default();

            match self_properties {
                None => {
                    mark_ancestors_dirty(tx, account, path, now, &mut changes)?;
                    delete_subtree(tx, account, path, &mut pending_file_removals, &mut changes)?;
                }
                Some(props) => {
                    mark_ancestors_dirty(tx, account, path, now, &mut changes)?;
                    write_self_and_children(tx, account, path, props, children, now, &mut pending_file_removals, &mut changes)?;
                }
            }

            Ok(changes)
        })?;

        for path in pending_file_removals {
            let _ = fs::remove_file(path);
        }

        Ok(changes)
    }

    /// Atomically adopt a downloaded body: validates the resource exists,
    /// is a non-collection, and that `version` still matches its current
    /// version, then moves `source_path` into the Store-owned body cache.
    /// A stale `version` discards `source_path` and returns an empty change
    /// set rather than an error (the download raced a property update).
    pub fn move_file(&self, source_path: &FsPath, version: &str, resource: &ResourceId) -> Result<ChangeSet, Error> {
        let now = Utc::now();

        let (changes, dest) = self.conn.exclusive_tx(|tx| {
            let existing = load_resource(tx, &resource.account, &resource.path)?
                .ok_or_else(|| Error::InvalidArgument(format!("no such resource: {}", resource.path)))?;

            if existing.is_collection {
                return Err(Error::InvalidArgument("cannot store a body for a collection".into()));
            }

            if existing.version != version {
                return Ok((ChangeSet::default(), None));
            }

            let dest = self.body_path(resource, version);

            let mut updated = existing;
            updated.file_state = FileState::Present {
                local_path: dest.clone(),
                stored_version: version.to_string(),
            };
            updated.updated = now;

            upsert_resource(tx, &resource.account, &updated)?;

            let mut changes = ChangeSet::default();
            changes.inserted_or_updated.push(updated);

            Ok((changes, Some(dest)))
        })?;

        match dest {
            Some(dest) => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(Error::Io)?;
                }
                fs::rename(source_path, &dest).map_err(Error::Io)?;
            }
            None => {
                let _ = fs::remove_file(source_path);
            }
        }

        Ok(changes)
    }

    fn body_path(&self, resource: &ResourceId, version: &str) -> PathBuf {
        let mut hasher_input = resource.account.as_str().to_string();
        hasher_input.push('\u{1}');
        hasher_input.push_str(&resource.path.storage_key());
        hasher_input.push('\u{1}');
        hasher_input.push_str(version);

        let key = format!("{:016x}", xxh3_64(hasher_input.as_bytes()));

        self.bodies_root.join(&key[..2]).join(key)
    }
}

/// Whether two resources are identical in every field but `updated`.
fn unchanged_ignoring_updated(a: &Resource, b: &Resource) -> bool {
    a.path == b.path
        && a.is_collection == b.is_collection
        && a.version == b.version
        && a.dirty == b.dirty
        && a.content_type == b.content_type
        && a.content_length == b.content_length
        && a.modified == b.modified
        && a.file_state == b.file_state
}

fn account_path_valid(path: &Path) -> bool {
    path.components().iter().all(|c| !c.is_empty())
}

fn ensure_account_exists(tx: &mut SqliteConnection, account: &account::Id) -> Result<(), Error> {
    use schema::accounts::dsl as a;

    let exists = a::accounts.filter(a::id.eq(account.as_str())).count().get_result::<i64>(tx)? > 0;

    if exists {
        Ok(())
    } else {
        Err(Error::UnknownAccount)
    }
}

fn load_resource(tx: &mut SqliteConnection, account: &account::Id, path: &Path) -> Result<Option<Resource>, Error> {
    use schema::resources::dsl as r;

    r::resources
        .filter(r::account_id.eq(account.as_str()))
        .filter(r::path_key.eq(path.storage_key()))
        .select(model::ResourceRow::as_select())
        .first(tx)
        .optional()?
        .map(model::ResourceRow::into_resource)
        .transpose()
}

fn load_children(tx: &mut SqliteConnection, account: &account::Id, path: &Path) -> Result<Vec<Resource>, Error> {
    use schema::resources::dsl as r;

    r::resources
        .filter(r::account_id.eq(account.as_str()))
        .filter(r::parent_key.eq(path.storage_key()))
        .select(model::ResourceRow::as_select())
        .load(tx)?
        .into_iter()
        .map(model::ResourceRow::into_resource)
        .collect()
}

/// Every resource for `account` whose path is `path` itself or a strict
/// descendant of it. Loads the whole account's resource set once; the
/// engine mirrors a single user's namespace, not a planet-scale tree.
fn subtree_including_self(tx: &mut SqliteConnection, account: &account::Id, path: &Path) -> Result<Vec<Resource>, Error> {
    use schema::resources::dsl as r;

    let all = r::resources
        .filter(r::account_id.eq(account.as_str()))
        .select(model::ResourceRow::as_select())
        .load(tx)?
        .into_iter()
        .map(model::ResourceRow::into_resource)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(all
        .into_iter()
        .filter(|r| r.path == *path || r.path.components().starts_with(path.components()))
        .collect())
}

fn upsert_resource(tx: &mut SqliteConnection, account: &account::Id, resource: &Resource) -> Result<(), Error> {
    use schema::resources::dsl as r;

    let row = model::new_row(account, resource);

    diesel::delete(
        r::resources
            .filter(r::account_id.eq(account.as_str()))
            .filter(r::path_key.eq(resource.path.storage_key())),
    )
    .execute(tx)?;

    diesel::insert_into(r::resources).values(row).execute(tx)?;

    Ok(())
}

fn delete_subtree(
    tx: &mut SqliteConnection,
    account: &account::Id,
    path: &Path,
    pending_file_removals: &mut Vec<PathBuf>,
    changes: &mut ChangeSet,
) -> Result<(), Error> {
    use schema::resources::dsl as r;

    let victims = subtree_including_self(tx, account, path)?;

    if victims.is_empty() {
        return Ok(());
    }

    for victim in &victims {
        if let FileState::Present { local_path, .. } = &victim.file_state {
            pending_file_removals.push(local_path.clone());
        }
    }

    let keys = victims.iter().map(|v| v.path.storage_key()).collect::<Vec<_>>();

    diesel::delete(
        r::resources
            .filter(r::account_id.eq(account.as_str()))
            .filter(r::path_key.eq_any(keys)),
    )
    .execute(tx)?;

    changes.deleted.extend(victims);

    Ok(())
}

/// Materializes any missing ancestor of `path` and marks every ancestor
/// (existing or new) `dirty = true`. A no-op for the account root, which
/// has no ancestors.
fn mark_ancestors_dirty(
    tx: &mut SqliteConnection,
    account: &account::Id,
    path: &Path,
    now: chrono::DateTime<Utc>,
    changes: &mut ChangeSet,
) -> Result<(), Error> {
    for ancestor in path.ancestors() {
        match load_resource(tx, account, &ancestor)? {
            None => {
                let resource = Resource::materialized_ancestor(ancestor, now);
                upsert_resource(tx, account, &resource)?;
                changes.inserted_or_updated.push(resource);
            }
            Some(existing) if existing.dirty => {}
            Some(mut existing) => {
                existing.dirty = true;
                existing.updated = now;
                upsert_resource(tx, account, &existing)?;
                changes.inserted_or_updated.push(existing);
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn write_self_and_children(
    tx: &mut SqliteConnection,
    account: &account::Id,
    path: &Path,
    props: SelfProperties,
    children: Option<ChildProperties>,
    now: chrono::DateTime<Utc>,
    pending_file_removals: &mut Vec<PathBuf>,
    changes: &mut ChangeSet,
) -> Result<(), Error> {
    // Step b: a collection <-> non-collection flip prunes the previous
    // subtree (and the previous self) before anything is written.
    if let Some(existing) = load_resource(tx, account, path)? {
        if existing.is_collection != props.is_collection {
            delete_subtree(tx, account, path, pending_file_removals, changes)?;
            // `path` itself is about to be rewritten below; only its strict
            // descendants are actually gone, so it must not also appear in
            // `deleted` (Testable Property 7).
            changes.deleted.retain(|r| r.path != *path);
        }
    }

    // Step c: write self.
    let old = load_resource(tx, account, path)?;

    let dirty_self = children.is_none() && props.is_collection;

    let file_state = match &old {
        Some(old) if old.version == props.version => old.file_state.clone(),
        Some(old) => {
            if let FileState::Present { local_path, .. } = &old.file_state {
                pending_file_removals.push(local_path.clone());
            }
            FileState::Absent
        }
        None => FileState::Absent,
    };

    let mut new_resource = Resource {
        path: path.clone(),
        is_collection: props.is_collection,
        version: props.version,
        dirty: dirty_self,
        updated: now,
        content_type: props.content_type,
        content_length: props.content_length,
        modified: props.modified,
        file_state,
    };

    // `old.updated` carries whatever timestamp it was last written with,
    // while `now` is freshly sampled, so the two are never equal even when
    // every other field is identical. Compare ignoring `updated`, and only
    // bump it when something else actually changed, so re-writing identical
    // properties is a true no-op (Testable Property 3).
    let changed = match &old {
        Some(old) => !unchanged_ignoring_updated(old, &new_resource),
        None => true,
    };
    if !changed {
        new_resource.updated = old.as_ref().expect("changed is false only when old exists").updated;
    }

    upsert_resource(tx, account, &new_resource)?;

    if changed {
        changes.inserted_or_updated.push(new_resource);
    }

    // Step d: isolated per-child updates; anything existing but unlisted is
    // pruned along with its subtree.
    if let Some(children_map) = children {
        let existing_children = load_children(tx, account, path)?;
        let mut seen = HashSet::new();

        for (name, child_props) in children_map {
            seen.insert(name.clone());
            let child_path = path.child(name);
            write_self_and_children(tx, account, &child_path, child_props, None, now, pending_file_removals, changes)?;
        }

        for stale in existing_children {
            let name = stale.path.components().last().cloned().unwrap_or_default();
            if !seen.contains(&name) {
                delete_subtree(tx, account, &stale.path, pending_file_removals, changes)?;
            }
        }
    }

    Ok(())
}

fn uuid_like_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock").as_nanos();

    format!("acc-{nanos:032x}")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("an account with the same url and username already exists")]
    Conflict,
    #[error("unknown account")]
    UnknownAccount,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid account row: {0}")]
    InvalidAccount(String),
    #[error("corrupt file_state column")]
    CorruptFileState,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("io: {0}")]
    Io(#[source] std::io::Error),
    #[error("diesel")]
    Diesel(#[from] diesel::result::Error),
    #[error("diesel connection")]
    Connection(#[from] diesel::ConnectionError),
    #[error("diesel migration")]
    Migration(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
