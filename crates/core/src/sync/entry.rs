//! Enumerated entries and their fingerprints

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::Serialize;

/// Change-detection data for one entry
///
/// A content hash (ETag) is authoritative when both sides have one;
/// otherwise the destination counts as current when it is not older than
/// the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Fingerprint {
    pub fn from_mtime(modified: Option<Timestamp>) -> Self {
        Self {
            modified,
            content: None,
        }
    }

    pub fn from_object(modified: Option<Timestamp>, etag: Option<String>) -> Self {
        Self {
            modified,
            content: etag.filter(|e| !e.is_empty()),
        }
    }

    /// Whether a destination with fingerprint `dest` already holds this content
    ///
    /// Without hashes on both sides a source timestamp in the future keeps
    /// the entry changed until the destination catches up with it.
    pub fn is_satisfied_by(&self, dest: &Fingerprint) -> bool {
        if let (Some(src), Some(dst)) = (&self.content, &dest.content) {
            return src.eq_ignore_ascii_case(dst);
        }
        match (self.modified, dest.modified) {
            (Some(src), Some(dst)) => dst.as_second() >= src.as_second(),
            _ => false,
        }
    }
}

/// One file, object or directory of a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Relative to the location root, `/`-separated, no leading or trailing `/`
    pub relative_path: String,
    pub size: i64,
    pub fingerprint: Fingerprint,
    pub is_dir: bool,
    /// Directory known only from a delimited listing's common prefix; it
    /// has no object of its own and is never deleted
    #[serde(skip)]
    pub implied: bool,
}

impl Entry {
    pub fn file(relative_path: impl Into<String>, size: i64, fingerprint: Fingerprint) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            fingerprint,
            is_dir: false,
            implied: false,
        }
    }

    pub fn dir(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size: 0,
            fingerprint: Fingerprint::default(),
            is_dir: true,
            implied: false,
        }
    }

    /// Directory reported as a common prefix
    pub fn prefix(relative_path: impl Into<String>) -> Self {
        Self {
            implied: true,
            ..Self::dir(relative_path)
        }
    }

    /// Whether `dest` holds the same content as this source entry
    pub fn is_unchanged_at(&self, dest: &Entry) -> bool {
        !self.is_dir
            && !dest.is_dir
            && self.size == dest.size
            && self.fingerprint.is_satisfied_by(&dest.fingerprint)
    }

    /// Final path component
    pub fn name(&self) -> &str {
        file_name(&self.relative_path)
    }
}

/// Whether every `/`-separated segment is a plain name
///
/// Rejects empty segments and `.`/`..`, which would otherwise escape or
/// alias paths under a local root.
pub fn is_safe_relative(relative_path: &str) -> bool {
    !relative_path.is_empty()
        && relative_path
            .split('/')
            .all(|segment| !matches!(segment, "" | "." | "..") && !segment.contains('\\'))
}

pub(crate) fn file_name(relative_path: &str) -> &str {
    relative_path
        .rsplit('/')
        .next()
        .unwrap_or(relative_path)
}

/// Complete listing of one location, keyed by relative path
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
    /// Files dropped by include/exclude patterns
    filtered: usize,
    /// Keys skipped because they cannot map to a path under the root
    unsafe_skipped: usize,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.relative_path.clone(), entry);
    }

    pub fn record_filtered(&mut self) {
        self.filtered += 1;
    }

    pub fn record_unsafe(&mut self) {
        self.unsafe_skipped += 1;
    }

    pub fn unsafe_skipped(&self) -> usize {
        self.unsafe_skipped
    }

    pub fn get(&self, relative_path: &str) -> Option<&Entry> {
        self.entries.get(relative_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filtered(&self) -> usize {
        self.filtered
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values().filter(|e| !e.is_dir)
    }
}
