//! Pre-mutation safety checks
//!
//! Everything here runs after enumeration and before the first transfer or
//! deletion. A failure aborts the job with nothing changed.

use std::path::{Component, Path, PathBuf};

use super::diff::DiffResult;
use super::entry::Entry;
use super::enumerate::normalize_path;
use super::location::{Location, SyncJob};
use crate::config::DEFAULT_MAX_SYNC_NUMBERS;
use crate::error::{Error, Result};

/// Hard ceilings for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    pub max_sync_numbers: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_sync_numbers: DEFAULT_MAX_SYNC_NUMBERS,
        }
    }
}

/// Asks the user before destructive work
pub trait Confirm: Send + Sync {
    /// `paths` are the destination entries about to be removed
    fn confirm_delete(&self, destination: &Location, paths: &[String]) -> bool;
}

/// Used with `--force`
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm_delete(&self, _destination: &Location, _paths: &[String]) -> bool {
        true
    }
}

/// Used when no interactive terminal is available
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm_delete(&self, _destination: &Location, _paths: &[String]) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct Guard {
    limits: SyncLimits,
}

impl Guard {
    pub fn new(limits: SyncLimits) -> Self {
        Self { limits }
    }

    /// Run every check in order: limit, destination, backup directory
    pub fn check(
        &self,
        job: &SyncJob,
        diff: &DiffResult,
        delete: bool,
        backup_dir: Option<&Path>,
    ) -> Result<()> {
        self.check_limit(diff)?;
        if let Location::Local(root) = job.destination() {
            check_local_destination(root)?;
        }
        if let Some(backup_dir) = backup_dir {
            check_backup_dir(job, backup_dir, delete, &diff.to_delete)?;
        }
        Ok(())
    }

    pub fn check_limit(&self, diff: &DiffResult) -> Result<()> {
        let found = diff.total_changes();
        if found > self.limits.max_sync_numbers {
            return Err(Error::SyncLimitExceeded {
                limit: self.limits.max_sync_numbers,
                found,
            });
        }
        Ok(())
    }
}

/// A local destination may be missing but must not be a regular file
pub fn check_local_destination(root: &Path) -> Result<()> {
    match std::fs::metadata(root) {
        Ok(meta) if !meta.is_dir() => Err(Error::DestinationNotDirectory(
            root.display().to_string(),
        )),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn check_backup_dir(
    job: &SyncJob,
    backup_dir: &Path,
    delete: bool,
    to_delete: &[Entry],
) -> Result<()> {
    if !delete {
        return Err(Error::InvalidBackupDir(
            "a backup directory requires --delete".into(),
        ));
    }
    let Location::Local(destination) = job.destination() else {
        return Err(Error::InvalidBackupDir(
            "backups are only supported for local destinations".into(),
        ));
    };

    let backup = normalize_path(backup_dir)?;
    let destination = normalize_path(destination)?;
    if backup.starts_with(&destination) {
        return Err(Error::InvalidBackupDir(format!(
            "{} is inside the destination {}",
            backup.display(),
            destination.display()
        )));
    }

    for ancestor in backup.ancestors() {
        if is_non_dir(ancestor)? {
            return Err(Error::InvalidBackupDir(format!(
                "{} exists and is not a directory",
                ancestor.display()
            )));
        }
    }

    for entry in to_delete {
        let relative = relative_to_path(&entry.relative_path)?;
        let parent = relative.parent().unwrap_or(Path::new(""));
        let needs_dir = if entry.is_dir { relative.as_path() } else { parent };
        if let Some(conflict) = first_file_ancestor(&backup, needs_dir)? {
            return Err(Error::BackupPathConflict(conflict.display().to_string()));
        }
    }
    Ok(())
}

/// Convert a `/`-separated relative path to a native one
///
/// Every segment must be a single normal component, so the result can
/// never climb out of the root it is joined to.
pub(crate) fn relative_to_path(relative: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for segment in relative.split('/') {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => path.push(segment),
            _ => {
                return Err(Error::InvalidPath(format!(
                    "'{relative}' is not a plain relative path"
                )));
            }
        }
    }
    Ok(path)
}

fn is_non_dir(path: &Path) -> Result<bool> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(!meta.is_dir()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// First path below `base` along `relative` that exists as a non-directory
pub(crate) fn first_file_ancestor(base: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let mut current = base.to_path_buf();
    for component in relative.components() {
        current.push(component);
        if is_non_dir(&current)? {
            return Ok(Some(current));
        }
    }
    Ok(None)
}
