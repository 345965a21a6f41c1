//! Three-way partition of two snapshots

use std::collections::BTreeSet;

use serde::Serialize;

use super::entry::{Entry, Snapshot};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    /// Source files missing from or changed at the destination
    pub to_transfer: Vec<Entry>,
    /// Destination entries with no source counterpart; empty unless deletion is enabled
    pub to_delete: Vec<Entry>,
    /// Source files already current at the destination
    pub unchanged: Vec<String>,
}

impl DiffResult {
    /// Number of mutations this diff would perform
    pub fn total_changes(&self) -> usize {
        self.to_transfer.len() + self.to_delete.len()
    }

    pub fn is_noop(&self) -> bool {
        self.to_transfer.is_empty() && self.to_delete.is_empty()
    }

    pub fn transfer_bytes(&self) -> u64 {
        self.to_transfer
            .iter()
            .map(|e| u64::try_from(e.size).unwrap_or(0))
            .sum()
    }
}

/// Every directory that exists on the source side, including those only
/// implied by a nested key
fn source_dirs(source: &Snapshot) -> BTreeSet<&str> {
    let mut dirs = BTreeSet::new();
    for entry in source.iter() {
        if entry.is_dir {
            dirs.insert(entry.relative_path.as_str());
        }
        let mut path = entry.relative_path.as_str();
        while let Some((parent, _)) = path.rsplit_once('/') {
            if !dirs.insert(parent) {
                break;
            }
            path = parent;
        }
    }
    dirs
}

/// Compare source and destination snapshots keyed by relative path
///
/// Directories are never transferred; the transfer primitive creates parents
/// on demand. A destination directory is only scheduled for deletion when
/// nothing on the source side lives at or below it, and only when it is a
/// real entry rather than a prefix implied by a shallow listing.
pub fn diff(source: &Snapshot, destination: &Snapshot, delete: bool) -> DiffResult {
    let mut result = DiffResult::default();

    for entry in source.files() {
        match destination.get(&entry.relative_path) {
            Some(existing) if entry.is_unchanged_at(existing) => {
                result.unchanged.push(entry.relative_path.clone());
            }
            _ => result.to_transfer.push(entry.clone()),
        }
    }

    if delete {
        let dirs = source_dirs(source);
        for entry in destination.iter() {
            let path = entry.relative_path.as_str();
            let keep = entry.implied
                || source.get(path).is_some()
                || (entry.is_dir && dirs.contains(path));
            if !keep {
                result.to_delete.push(entry.clone());
            }
        }
    }

    tracing::debug!(
        to_transfer = result.to_transfer.len(),
        to_delete = result.to_delete.len(),
        unchanged = result.unchanged.len(),
        "Computed diff"
    );
    result
}
