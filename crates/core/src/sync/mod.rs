//! Directory synchronization engine
//!
//! Reconciles a local directory tree and/or cloud prefixes: enumerate both
//! sides, diff them, check the plan against the guard rails, then transfer
//! and delete.

pub mod delete;
pub mod diff;
pub mod engine;
pub mod entry;
pub mod enumerate;
pub mod executor;
pub mod filter;
pub mod guard;
pub mod location;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use delete::{BackupRecord, DELETE_BATCH_SIZE, DeletionSummary};
pub use diff::DiffResult;
pub use engine::{SyncContext, SyncEngine, SyncOptions};
pub use entry::{Entry, Fingerprint, Snapshot};
pub use enumerate::{EnumerateOptions, SymlinkPolicy};
pub use executor::{TransferExecutor, TransferOp, TransferSummary, TransferTicket};
pub use filter::NameFilter;
pub use guard::{AlwaysConfirm, Confirm, Guard, NeverConfirm, SyncLimits};
pub use location::{Direction, Location, SyncJob};
pub use report::{ItemError, NoopObserver, SyncObserver, SyncPhase, SyncReport};
