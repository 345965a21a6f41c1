//! Path parsing
//!
//! A command-line path is either local (`./data`, `/srv/data`, `data`) or
//! remote (`alias/bucket[/prefix]`). Local paths must start with `/`, `.`,
//! `~` or a drive letter, or contain no `/` at all, to be recognized as
//! local.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// A location inside an S3-compatible service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    pub alias: String,
    pub bucket: String,
    /// Object key or key prefix, possibly empty
    pub key: String,
}

impl RemotePath {
    pub fn new(alias: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Key treated as a directory prefix: empty or ending in `/`
    pub fn dir_prefix(&self) -> String {
        if self.key.is_empty() || self.key.ends_with('/') {
            self.key.clone()
        } else {
            format!("{}/", self.key)
        }
    }

    /// Path of `relative` (a `/`-separated relative path) under this prefix
    pub fn join(&self, relative: &str) -> RemotePath {
        RemotePath::new(
            &self.alias,
            &self.bucket,
            format!("{}{}", self.dir_prefix(), relative.trim_start_matches('/')),
        )
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}/{}", self.alias, self.bucket)
        } else {
            write!(f, "{}/{}/{}", self.alias, self.bucket, self.key)
        }
    }
}

/// Result of classifying a command-line path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    Local(PathBuf),
    Remote(RemotePath),
}

impl ParsedPath {
    pub fn is_local(&self) -> bool {
        matches!(self, ParsedPath::Local(_))
    }
}

fn looks_local(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('.') || path.starts_with('~') {
        return true;
    }

    // Windows drive: C:\ or C:/
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return true;
    }

    path.contains('\\') || !path.contains('/')
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~')
        && (rest.is_empty() || rest.starts_with('/'))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest.trim_start_matches('/'));
    }
    PathBuf::from(path)
}

/// Classify a command-line path as local or remote
pub fn parse_path(path: &str) -> Result<ParsedPath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    if looks_local(path) {
        return Ok(ParsedPath::Local(expand_home(path)));
    }

    let mut parts = path.splitn(3, '/');
    let alias = parts.next().unwrap_or_default();
    let bucket = parts.next().unwrap_or_default();
    let key = parts.next().unwrap_or_default();

    if alias.is_empty() {
        return Err(Error::InvalidPath(format!("Missing alias in '{path}'")));
    }
    if bucket.is_empty() {
        return Err(Error::InvalidPath(format!("Missing bucket in '{path}'")));
    }

    Ok(ParsedPath::Remote(RemotePath::new(alias, bucket, key)))
}
