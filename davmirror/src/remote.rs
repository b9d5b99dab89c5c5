// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The outward contract against the remote protocol. Everything below the
//! [`RemoteClient`] trait — request construction, status handling, body
//! streaming — is owned here; everything above it (deciding what to fetch,
//! what to do with the result) belongs to [`crate::resource_manager`].

use std::future::Future;
use std::path::Path as FsPath;
use std::sync::OnceLock;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::account::Account;
use crate::path::Path;
use crate::resource::{ChildProperties, SelfProperties};

/// What a property fetch at one path can report. [`Self::NotFound`] is not
/// an error: the resource legitimately no longer exists remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertiesResponse {
    Found { self_properties: SelfProperties, children: ChildProperties },
    NotFound,
}

/// The outcome of a completed body download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub etag: String,
    pub bytes_written: u64,
}

/// A single progress tick surfaced to [`crate::transfer`] while a download
/// is in flight.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub delta: u64,
    pub completed: u64,
    pub total: Option<u64>,
}

/// The sole outward protocol boundary. Implementations speak whatever wire
/// format the remote requires; callers only ever see [`PropertiesResponse`]
/// and [`DownloadOutcome`].
pub trait RemoteClient: Send + Sync {
    /// `collection_hint` controls whether the composed URL is slash
    /// terminated; callers pass the local node's known-or-assumed
    /// collection-ness (see [`crate::remote::resolve_url`]). `password` is
    /// supplied once the host delegate has answered a prior
    /// [`Error::AuthenticationRequired`]; `None` means "attempt anonymously".
    fn retrieve_properties(
        &self,
        account: &Account,
        path: &Path,
        collection_hint: bool,
        password: Option<&str>,
    ) -> impl Future<Output = Result<PropertiesResponse, Error>> + Send;

    fn download(
        &self,
        account: &Account,
        path: &Path,
        dest: &FsPath,
        password: Option<&str>,
        on_progress: impl Fn(Progress) + Send,
    ) -> impl Future<Output = Result<DownloadOutcome, Error>> + Send;
}

/// Compose the remote URL for `path` under `account`'s base URL. A trailing
/// slash is appended when `collection_hint` is true, matching the source
/// convention that collection URLs are slash-terminated.
pub fn resolve_url(account: &Account, path: &Path, collection_hint: bool) -> Url {
    let mut url = account.base_url.clone();

    {
        let mut segments = url.path_segments_mut().expect("base url is not a cannot-be-a-base url");
        segments.pop_if_empty();
        for component in path.components() {
            segments.push(component);
        }
        if collection_hint {
            segments.push("");
        }
    }

    url
}

fn client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    CLIENT.get_or_init(|| {
        reqwest::ClientBuilder::new()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("build reqwest client")
    })
}

/// [`RemoteClient`] backed by a real HTTP PROPFIND/GET conversation.
#[derive(Debug, Clone, Default)]
pub struct HttpClient;

impl HttpClient {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteClient for HttpClient {
    async fn retrieve_properties(
        &self,
        account: &Account,
        path: &Path,
        collection_hint: bool,
        password: Option<&str>,
    ) -> Result<PropertiesResponse, Error> {
        let url = resolve_url(account, path, collection_hint);

        let response = client()
            .request(reqwest::Method::from_bytes(b"PROPFIND").expect("valid method"), url)
            .header("Depth", "1")
            .basic_auth(&account.username, password)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(PropertiesResponse::NotFound);
        }
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthenticationRequired);
        }

        let response = response.error_for_status().map_err(Error::from)?;
        let body = response.text().await?;

        multistatus::parse(&body).ok_or(Error::Malformed)
    }

    async fn download(
        &self,
        account: &Account,
        path: &Path,
        dest: &FsPath,
        password: Option<&str>,
        on_progress: impl Fn(Progress) + Send,
    ) -> Result<DownloadOutcome, Error> {
        let url = resolve_url(account, path, false);

        let response = client().get(url).basic_auth(&account.username, password).send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::AuthenticationRequired);
        }

        let response = response.error_for_status()?;

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .ok_or(Error::Malformed)?;

        let total = response.content_length();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = File::create(dest).await?;

        let mut stream = response.bytes_stream();
        let mut completed = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let delta = chunk.len() as u64;
            completed += delta;
            out.write_all(&chunk).await?;
            on_progress(Progress { delta, completed, total });
        }

        out.flush().await?;

        Ok(DownloadOutcome {
            etag,
            bytes_written: completed,
        })
    }
}

/// A best-effort extractor for the small multistatus shape this engine
/// relies on (one self entry plus zero or more immediate children, each
/// carrying resourcetype/getetag/getcontenttype/getcontentlength/getlastmodified).
/// A full WebDAV XML parser is out of scope here; this only recognizes the
/// handful of elements the reconciler needs.
mod multistatus {
    use chrono::{DateTime, Utc};

    use crate::resource::{ChildProperties, SelfProperties};

    use super::PropertiesResponse;

    pub(super) fn parse(body: &str) -> Option<PropertiesResponse> {
        let mut entries = body.split("<D:response>").skip(1).chain(body.split("<d:response>").skip(1));

        let first = entries.next()?;
        let self_properties = parse_entry(first)?;

        let mut children = ChildProperties::new();
        for entry in entries {
            if let Some((name, props)) = parse_named_entry(entry) {
                children.insert(name, props);
            }
        }

        Some(PropertiesResponse::Found { self_properties, children })
    }

    fn parse_named_entry(entry: &str) -> Option<(String, SelfProperties)> {
        let href = tag_text(entry, "href").or_else(|| tag_text(entry, "D:href"))?;
        let name = href.rsplit('/').find(|s| !s.is_empty())?.to_string();
        Some((name, parse_entry(entry)?))
    }

    fn parse_entry(entry: &str) -> Option<SelfProperties> {
        let is_collection = entry.contains("<D:collection") || entry.contains("<d:collection");
        let version = tag_text(entry, "getetag").or_else(|| tag_text(entry, "D:getetag")).unwrap_or_default();
        let content_type = tag_text(entry, "getcontenttype").or_else(|| tag_text(entry, "D:getcontenttype"));
        let content_length = tag_text(entry, "getcontentlength")
            .or_else(|| tag_text(entry, "D:getcontentlength"))
            .and_then(|v| v.parse().ok());
        let modified = tag_text(entry, "getlastmodified")
            .or_else(|| tag_text(entry, "D:getlastmodified"))
            .and_then(|v| DateTime::parse_from_rfc2822(&v).ok())
            .map(|v| v.with_timezone(&Utc));

        Some(SelfProperties {
            is_collection,
            version: version.trim_matches('"').to_string(),
            content_type,
            content_length,
            modified,
        })
    }

    fn tag_text(haystack: &str, tag: &str) -> Option<String> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = haystack.find(&open)? + open.len();
        let end = haystack[start..].find(&close)? + start;
        Some(haystack[start..end].to_string())
    }
}

/// Test double used throughout the store/reconcile/transfer tests; never
/// issues a network request.
pub mod stub {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct StubEntry {
        pub response: PropertiesResponse,
    }

    #[derive(Debug, Clone)]
    pub struct StubBody {
        pub etag: String,
        pub bytes: Vec<u8>,
    }

    /// A fixed-script [`RemoteClient`]: property responses and download
    /// bodies are registered ahead of time, keyed by path.
    #[derive(Debug, Default)]
    pub struct StubClient {
        properties: Mutex<HashMap<Path, StubEntry>>,
        bodies: Mutex<HashMap<Path, StubBody>>,
    }

    impl StubClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_properties(&self, path: Path, response: PropertiesResponse) {
            self.properties.lock().expect("mutex").insert(path, StubEntry { response });
        }

        pub fn set_body(&self, path: Path, etag: impl Into<String>, bytes: impl Into<Vec<u8>>) {
            self.bodies.lock().expect("mutex").insert(
                path,
                StubBody {
                    etag: etag.into(),
                    bytes: bytes.into(),
                },
            );
        }
    }

    impl RemoteClient for StubClient {
        async fn retrieve_properties(
            &self,
            _account: &Account,
            path: &Path,
            _collection_hint: bool,
            _password: Option<&str>,
        ) -> Result<PropertiesResponse, Error> {
            self.properties
                .lock()
                .expect("mutex")
                .get(path)
                .map(|e| e.response.clone())
                .ok_or(Error::Malformed)
        }

        async fn download(
            &self,
            _account: &Account,
            path: &Path,
            dest: &FsPath,
            _password: Option<&str>,
            on_progress: impl Fn(Progress) + Send,
        ) -> Result<DownloadOutcome, Error> {
            let body = self.bodies.lock().expect("mutex").get(path).cloned().ok_or(Error::NotFound)?;

            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(Error::Io)?;
            }
            std::fs::write(dest, &body.bytes).map_err(Error::Io)?;

            on_progress(Progress {
                delta: body.bytes.len() as u64,
                completed: body.bytes.len() as u64,
                total: Some(body.bytes.len() as u64),
            });

            Ok(DownloadOutcome {
                etag: body.etag,
                bytes_written: body.bytes.len() as u64,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response")]
    Malformed,
    #[error("not found")]
    NotFound,
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
