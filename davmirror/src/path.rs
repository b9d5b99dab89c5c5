// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Resource paths: an ordered sequence of non-empty path components.

use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

/// Characters a WebDAV URL path segment must escape beyond the controls set.
const PATH_SEGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'<').add(b'>').add(b'?').add(b'`');

/// An ordered sequence of path components. The empty sequence denotes the
/// account root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(Vec<String>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(components: impl IntoIterator<Item = String>) -> Result<Self, Error> {
        let components = components.into_iter().collect::<Vec<_>>();

        if let Some(empty) = components.iter().position(|c| c.is_empty()) {
            return Err(Error::EmptyComponent(empty));
        }

        Ok(Self(components))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The path of this resource's parent, or `None` if this is the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// `self` extended by one trailing component.
    pub fn child(&self, name: impl Into<String>) -> Path {
        let mut components = self.0.clone();
        components.push(name.into());
        Path(components)
    }

    /// Every proper prefix of this path, shortest first, not including the
    /// path itself. The root's ancestor list is empty.
    pub fn ancestors(&self) -> Vec<Path> {
        (0..self.0.len()).map(|n| Path(self.0[..n].to_vec())).collect()
    }

    /// Stable key for use as a SQL column: components joined by a unit
    /// separator that can never occur inside a path component supplied by a
    /// WebDAV server's decoded property values.
    pub fn storage_key(&self) -> String {
        self.0.join("\u{1}")
    }

    pub fn from_storage_key(key: &str) -> Self {
        if key.is_empty() {
            Path::root()
        } else {
            Path(key.split('\u{1}').map(String::from).collect())
        }
    }

    /// Percent-encoded path suitable for appending to a base URL.
    pub fn encoded(&self) -> String {
        self.0
            .iter()
            .map(|c| utf8_percent_encode(c, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("path component {0} is empty")]
    EmptyComponent(usize),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ancestors_shortest_first() {
        let path = Path::new(["a", "b", "c"].map(String::from)).unwrap();

        let ancestors = path.ancestors();

        assert_eq!(
            ancestors,
            vec![
                Path::root(),
                Path::new(["a".to_string()]).unwrap(),
                Path::new(["a", "b"].map(String::from)).unwrap(),
            ]
        );
    }

    #[test]
    fn storage_key_roundtrip() {
        let path = Path::new(["a", "b", "c"].map(String::from)).unwrap();

        assert_eq!(Path::from_storage_key(&path.storage_key()), path);
        assert_eq!(Path::from_storage_key(""), Path::root());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(matches!(
            Path::new(["a".to_string(), String::new()]),
            Err(Error::EmptyComponent(1))
        ));
    }
}
