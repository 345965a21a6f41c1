//! Location enumeration
//!
//! Produces a complete `Snapshot` of one location. Any listing or I/O error
//! aborts the enumeration: a partial snapshot is never diffed.

use std::path::{Component, Path, PathBuf};

use jiff::Timestamp;
use walkdir::{DirEntry, WalkDir};

use super::entry::{Entry, Fingerprint, Snapshot, is_safe_relative};
use super::filter::NameFilter;
use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::traits::{ListOptions, ObjectStore};

const LIST_PAGE_SIZE: i32 = 1000;

/// How symbolic links are treated during a local walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SymlinkPolicy {
    /// Include symlinked files, skip symlinked directories
    #[default]
    SkipDirs,
    /// Include symlinked files and descend into symlinked directories
    FollowDirs,
    /// Skip every symlink
    SkipAll,
}

impl SymlinkPolicy {
    /// Combine the two command-line switches; disabling all links wins
    pub fn from_flags(disable_all_symlink: bool, enable_symlink_dir: bool) -> Self {
        if disable_all_symlink {
            SymlinkPolicy::SkipAll
        } else if enable_symlink_dir {
            SymlinkPolicy::FollowDirs
        } else {
            SymlinkPolicy::SkipDirs
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    /// Immediate level only, no recursion
    pub only_current_dir: bool,
    pub symlinks: SymlinkPolicy,
    /// Abort once a snapshot grows beyond this many entries
    pub max_entries: usize,
    /// Directory pruned from local walks (the transfer checkpoint directory)
    pub skip_dir: Option<PathBuf>,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            only_current_dir: false,
            symlinks: SymlinkPolicy::default(),
            max_entries: crate::config::DEFAULT_MAX_SYNC_NUMBERS,
            skip_dir: None,
        }
    }
}

fn check_limit(snapshot: &Snapshot, options: &EnumerateOptions) -> Result<()> {
    if snapshot.len() > options.max_entries {
        return Err(Error::SyncLimitExceeded {
            limit: options.max_entries,
            found: snapshot.len(),
        });
    }
    Ok(())
}

/// Lexically absolute form of `path`, with `.` and `..` resolved
pub(crate) fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn mtime(meta: &std::fs::Metadata) -> Option<Timestamp> {
    meta.modified()
        .ok()
        .and_then(|t| Timestamp::try_from(t).ok())
}

/// Walk a local directory tree
///
/// Blocking; run it on a blocking thread from async code.
pub fn enumerate_local(
    root: &Path,
    filter: &NameFilter,
    options: &EnumerateOptions,
) -> Result<Snapshot> {
    let location = root.display().to_string();
    let root = normalize_path(root).map_err(|e| Error::enumeration(&location, e))?;
    let skip_dir = match &options.skip_dir {
        Some(dir) => Some(normalize_path(dir).map_err(|e| Error::enumeration(&location, e))?),
        None => None,
    };

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(if options.only_current_dir { 1 } else { usize::MAX })
        .follow_links(options.symlinks == SymlinkPolicy::FollowDirs)
        .into_iter()
        .filter_entry(|e| keep_entry(e, options.symlinks, skip_dir.as_deref()));

    let mut snapshot = Snapshot::new();

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => {
                tracing::warn!(path = ?e.path(), "Skipping symlink loop");
                continue;
            }
            Err(e)
                if e.io_error()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound) =>
            {
                // Dangling symlink or file removed during the walk
                tracing::warn!(path = ?e.path(), "Skipping vanished path");
                continue;
            }
            Err(e) => return Err(Error::enumeration(&location, e)),
        };

        let Some(relative) = relative_key(&root, entry.path()) else {
            continue;
        };

        // Resolves symlinked files to their target's metadata
        let meta = match std::fs::metadata(entry.path()) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %entry.path().display(), "Skipping dangling symlink");
                continue;
            }
            Err(e) => return Err(Error::enumeration(&location, e)),
        };

        if meta.is_dir() {
            if entry.path_is_symlink() && options.symlinks != SymlinkPolicy::FollowDirs {
                tracing::debug!(path = %relative, "Skipping symlinked directory");
                continue;
            }
            snapshot.insert(Entry::dir(relative));
        } else if filter.matches(&relative) {
            let size = i64::try_from(meta.len()).unwrap_or(i64::MAX);
            snapshot.insert(Entry::file(
                relative,
                size,
                Fingerprint::from_mtime(mtime(&meta)),
            ));
        } else {
            snapshot.record_filtered();
        }

        check_limit(&snapshot, options)?;
    }

    tracing::debug!(
        location = %location,
        entries = snapshot.len(),
        filtered = snapshot.filtered(),
        "Enumerated local directory"
    );
    Ok(snapshot)
}

fn keep_entry(entry: &DirEntry, symlinks: SymlinkPolicy, skip_dir: Option<&Path>) -> bool {
    if symlinks == SymlinkPolicy::SkipAll && entry.path_is_symlink() {
        return false;
    }
    match skip_dir {
        Some(dir) => !entry.path().starts_with(dir),
        None => true,
    }
}

/// List every object under a cloud prefix, page by page
pub async fn enumerate_cloud(
    store: &dyn ObjectStore,
    prefix: &RemotePath,
    filter: &NameFilter,
    options: &EnumerateOptions,
) -> Result<Snapshot> {
    let base = prefix.dir_prefix();
    let listing_root = RemotePath::new(&prefix.alias, &prefix.bucket, &base);
    let mut snapshot = Snapshot::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let list_options = ListOptions {
            recursive: !options.only_current_dir,
            max_keys: Some(LIST_PAGE_SIZE),
            continuation_token: continuation_token.take(),
        };

        let page = store
            .list_objects(&listing_root, list_options)
            .await
            .map_err(|e| Error::enumeration(prefix, e))?;

        for item in page.items {
            let Some(relative) = item.key.strip_prefix(base.as_str()) else {
                continue;
            };
            let marker = relative.ends_with('/');
            let relative = relative.strip_suffix('/').unwrap_or(relative);
            if relative.is_empty() {
                continue;
            }
            if !is_safe_relative(relative) {
                tracing::warn!(key = %item.key, "Skipping key that does not map to a relative path");
                snapshot.record_unsafe();
                continue;
            }

            if item.is_dir {
                snapshot.insert(Entry::prefix(relative));
            } else if marker {
                snapshot.insert(Entry::dir(relative));
            } else if filter.matches(relative) {
                snapshot.insert(Entry::file(
                    relative,
                    item.size_bytes.unwrap_or(0),
                    Fingerprint::from_object(item.last_modified, item.etag),
                ));
            } else {
                snapshot.record_filtered();
            }
        }

        check_limit(&snapshot, options)?;

        if !page.truncated {
            break;
        }
        match page.continuation_token {
            Some(token) => continuation_token = Some(token),
            None => {
                return Err(Error::enumeration(
                    prefix,
                    "listing truncated without a continuation token",
                ));
            }
        }
    }

    tracing::debug!(
        location = %prefix,
        entries = snapshot.len(),
        filtered = snapshot.filtered(),
        "Enumerated cloud prefix"
    );
    Ok(snapshot)
}
