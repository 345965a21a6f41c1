//! Outcome aggregation for one sync run

use serde::Serialize;

use super::location::Direction;

/// Mutating phase an item outcome belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Transfer,
    Delete,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Transfer => write!(f, "transfer"),
            SyncPhase::Delete => write!(f, "delete"),
        }
    }
}

/// A single failed transfer or deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub path: String,
    pub phase: SyncPhase,
    pub message: String,
}

impl ItemError {
    pub fn new(path: impl Into<String>, phase: SyncPhase, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            phase,
            message: message.into(),
        }
    }
}

/// Final summary of a sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub destination: String,
    pub direction: Direction,
    pub dry_run: bool,
    pub transferred: usize,
    pub transferred_bytes: u64,
    pub deleted: usize,
    pub backed_up: usize,
    pub unchanged: usize,
    /// Source files skipped by include/exclude patterns
    pub filtered: usize,
    /// Cloud keys that do not map to a plain relative path
    pub unsafe_skipped: usize,
    /// Deletions were planned but not confirmed
    pub deletion_skipped: bool,
    /// Planned transfers; only filled for dry runs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_transfers: Vec<String>,
    /// Planned deletions; filled for dry runs and skipped deletions
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_deletions: Vec<String>,
    pub errors: Vec<ItemError>,
}

impl SyncReport {
    pub fn new(source: String, destination: String, direction: Direction) -> Self {
        Self {
            source,
            destination,
            direction,
            dry_run: false,
            transferred: 0,
            transferred_bytes: 0,
            deleted: 0,
            backed_up: 0,
            unchanged: 0,
            filtered: 0,
            unsafe_skipped: 0,
            deletion_skipped: false,
            planned_transfers: Vec::new(),
            planned_deletions: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Success means zero per-item failures in both phases
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn failed(&self, phase: SyncPhase) -> usize {
        self.errors.iter().filter(|e| e.phase == phase).count()
    }
}

/// Progress callbacks from the mutating phases
///
/// Called from worker tasks, so implementations must be thread-safe.
pub trait SyncObserver: Send + Sync {
    fn phase_started(&self, _phase: SyncPhase, _items: usize, _bytes: u64) {}

    fn item_finished(&self, _phase: SyncPhase, _path: &str, _bytes: u64, _error: Option<&str>) {}

    fn phase_finished(&self, _phase: SyncPhase) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SyncObserver for NoopObserver {}
