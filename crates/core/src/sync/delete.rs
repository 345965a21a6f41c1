//! Deletion phase
//!
//! Cloud entries are removed with batch deletes. Local entries are removed
//! outright or, with a backup directory, moved into a mirror tree under it.
//! Files go first, then directories deepest first, and a directory is only
//! removed once it is empty.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::entry::Entry;
use super::guard::{first_file_ancestor, relative_to_path};
use super::report::{ItemError, SyncObserver, SyncPhase};
use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::traits::ObjectStore;

/// S3 caps one DeleteObjects request at 1000 keys
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Where a deleted local entry was moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub original_relative_path: String,
    pub backup_absolute_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct DeletionSummary {
    pub deleted: usize,
    pub backups: Vec<BackupRecord>,
    pub errors: Vec<ItemError>,
}

/// Batch-delete cloud entries below `prefix`
pub async fn delete_cloud(
    store: &dyn ObjectStore,
    prefix: &RemotePath,
    entries: &[Entry],
    observer: &dyn SyncObserver,
) -> DeletionSummary {
    let base = prefix.dir_prefix();
    let mut summary = DeletionSummary::default();

    let keys: Vec<String> = entries
        .iter()
        .map(|e| {
            if e.is_dir {
                format!("{base}{}/", e.relative_path)
            } else {
                format!("{base}{}", e.relative_path)
            }
        })
        .collect();
    let relative = |key: &str| -> String {
        key.strip_prefix(base.as_str())
            .unwrap_or(key)
            .trim_end_matches('/')
            .to_string()
    };

    for batch in keys.chunks(DELETE_BATCH_SIZE) {
        match store.delete_objects(&prefix.bucket, batch.to_vec()).await {
            Ok(result) => {
                // Keys not reported as failed are gone
                let failed: Vec<&str> = result.failed.iter().map(|(k, _)| k.as_str()).collect();
                for key in batch.iter().filter(|k| !failed.contains(&k.as_str())) {
                    summary.deleted += 1;
                    observer.item_finished(SyncPhase::Delete, &relative(key), 0, None);
                }
                for (key, message) in result.failed {
                    tracing::warn!(key = %key, error = %message, "Delete failed");
                    let path = relative(&key);
                    observer.item_finished(SyncPhase::Delete, &path, 0, Some(&message));
                    summary
                        .errors
                        .push(ItemError::new(path, SyncPhase::Delete, message));
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(keys = batch.len(), error = %message, "Batch delete failed");
                for key in batch {
                    let path = relative(key);
                    observer.item_finished(SyncPhase::Delete, &path, 0, Some(&message));
                    summary
                        .errors
                        .push(ItemError::new(path, SyncPhase::Delete, message.clone()));
                }
            }
        }
    }

    summary
}

fn depth(relative_path: &str) -> usize {
    relative_path.matches('/').count()
}

/// Rename, or copy then remove when the rename crosses filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(e) => {
            tracing::debug!(from = %from.display(), error = %e, "Rename failed, copying instead");
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Remove or back up local entries under `root`
///
/// Blocking. Per-entry failures are collected; a file standing where the
/// backup tree needs a directory aborts the phase with `BackupPathConflict`.
pub fn delete_local(
    root: &Path,
    backup_dir: Option<&Path>,
    entries: &[Entry],
    observer: &dyn SyncObserver,
) -> Result<DeletionSummary> {
    let mut summary = DeletionSummary::default();

    let mut files: Vec<&Entry> = entries.iter().filter(|e| !e.is_dir).collect();
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    let mut dirs: Vec<&Entry> = entries.iter().filter(|e| e.is_dir).collect();
    dirs.sort_by(|a, b| {
        depth(&b.relative_path)
            .cmp(&depth(&a.relative_path))
            .then_with(|| b.relative_path.cmp(&a.relative_path))
    });

    for entry in files {
        let rel = relative_to_path(&entry.relative_path)?;
        let path = root.join(&rel);
        let size = u64::try_from(entry.size).unwrap_or(0);

        let outcome = match backup_dir {
            Some(backup) => {
                let parent = rel.parent().unwrap_or(Path::new(""));
                if let Some(conflict) = first_file_ancestor(backup, parent)? {
                    return Err(Error::BackupPathConflict(conflict.display().to_string()));
                }
                let target = backup.join(&rel);
                std::fs::create_dir_all(backup.join(parent))
                    .and_then(|()| move_file(&path, &target))
                    .map(|()| Some(target))
            }
            None => std::fs::remove_file(&path).map(|()| None),
        };

        record(&mut summary, observer, entry, size, outcome);
    }

    for entry in dirs {
        let rel = relative_to_path(&entry.relative_path)?;
        let path = root.join(&rel);

        match std::fs::remove_dir(&path) {
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                // Still holds filtered or failed entries
                tracing::debug!(path = %entry.relative_path, "Keeping non-empty directory");
                continue;
            }
            result => {
                let outcome = result.and_then(|()| match backup_dir {
                    Some(backup) => {
                        let mirror = backup.join(&rel);
                        std::fs::create_dir_all(&mirror).map(|()| Some(mirror))
                    }
                    None => Ok(None),
                });
                record(&mut summary, observer, entry, 0, outcome);
            }
        }
    }

    Ok(summary)
}

fn record(
    summary: &mut DeletionSummary,
    observer: &dyn SyncObserver,
    entry: &Entry,
    size: u64,
    outcome: std::io::Result<Option<PathBuf>>,
) {
    let path = entry.relative_path.as_str();
    match outcome {
        Ok(Some(backup_absolute_path)) => {
            tracing::debug!(path, backup = %backup_absolute_path.display(), "Backed up");
            summary.backups.push(BackupRecord {
                original_relative_path: entry.relative_path.clone(),
                backup_absolute_path,
            });
            observer.item_finished(SyncPhase::Delete, path, size, None);
        }
        Ok(None) => {
            tracing::debug!(path, "Deleted");
            summary.deleted += 1;
            observer.item_finished(SyncPhase::Delete, path, size, None);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path, "Already gone");
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(path, error = %message, "Delete failed");
            observer.item_finished(SyncPhase::Delete, path, size, Some(&message));
            summary
                .errors
                .push(ItemError::new(path, SyncPhase::Delete, message));
        }
    }
}
