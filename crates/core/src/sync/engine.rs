//! Sync job orchestration
//!
//! Runs the phases strictly in order: preflight, enumeration of both sides,
//! diff, guard, confirmation, transfer, deletion. Nothing is mutated before
//! the guard passes, and deletion starts only after every transfer worker
//! has finished.

use std::path::PathBuf;
use std::sync::Arc;

use super::delete::{DeletionSummary, delete_cloud, delete_local};
use super::diff::{DiffResult, diff};
use super::entry::Snapshot;
use super::enumerate::{EnumerateOptions, SymlinkPolicy, enumerate_cloud, enumerate_local};
use super::executor::{TransferExecutor, TransferTicket};
use super::filter::NameFilter;
use super::guard::{Confirm, Guard, SyncLimits, check_local_destination};
use super::location::{Location, SyncJob};
use super::report::{NoopObserver, SyncObserver, SyncPhase, SyncReport};
use crate::config::DEFAULT_ROUTINES;
use crate::error::{Error, Result};
use crate::traits::{ObjectStore, TransferPrimitive};

/// Behavior switches for one run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Remove destination entries that have no source counterpart
    pub delete: bool,
    /// Delete without asking
    pub force: bool,
    /// Plan only; nothing is transferred or deleted
    pub dry_run: bool,
    pub backup_dir: Option<PathBuf>,
    pub filter: NameFilter,
    pub only_current_dir: bool,
    pub symlinks: SymlinkPolicy,
    pub routines: usize,
    pub limits: SyncLimits,
    /// Owned by the transfer primitive; excluded from local enumeration
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            delete: false,
            force: false,
            dry_run: false,
            backup_dir: None,
            filter: NameFilter::new(),
            only_current_dir: false,
            symlinks: SymlinkPolicy::default(),
            routines: DEFAULT_ROUTINES,
            limits: SyncLimits::default(),
            checkpoint_dir: None,
        }
    }
}

/// Storage backends for the cloud side(s) of a job
pub struct SyncContext {
    pub source_store: Option<Arc<dyn ObjectStore>>,
    pub dest_store: Option<Arc<dyn ObjectStore>>,
    pub transfer: Arc<dyn TransferPrimitive>,
}

impl SyncContext {
    fn store_for(&self, location: &Location, source: bool) -> Result<Arc<dyn ObjectStore>> {
        let store = if source {
            &self.source_store
        } else {
            &self.dest_store
        };
        store
            .clone()
            .ok_or_else(|| Error::Config(format!("no storage client configured for {location}")))
    }
}

pub struct SyncEngine {
    job: SyncJob,
    options: SyncOptions,
    context: SyncContext,
    confirm: Arc<dyn Confirm>,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    pub fn new(
        job: SyncJob,
        options: SyncOptions,
        context: SyncContext,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            job,
            options,
            context,
            confirm,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn job(&self) -> &SyncJob {
        &self.job
    }

    /// Execute the job
    ///
    /// `Err` means a structural or enumeration failure and nothing was
    /// mutated (except for a backup conflict discovered mid-deletion).
    /// Per-item failures are reported in `SyncReport::errors`.
    pub async fn run(&self) -> Result<SyncReport> {
        tracing::info!(
            source = %self.job.source(),
            destination = %self.job.destination(),
            direction = %self.job.direction(),
            "Starting sync"
        );

        self.preflight().await?;

        let source = self.enumerate(self.job.source(), true).await?;
        let destination = self.enumerate(self.job.destination(), false).await?;

        let mut plan = diff(&source, &destination, self.options.delete);
        Guard::new(self.options.limits).check(
            &self.job,
            &plan,
            self.options.delete,
            self.options.backup_dir.as_deref(),
        )?;

        let mut report = SyncReport::new(
            self.job.source().to_string(),
            self.job.destination().to_string(),
            self.job.direction(),
        );
        report.unchanged = plan.unchanged.len();
        // Filters apply to source names; destination-side matches are not separate files
        report.filtered = source.filtered();
        report.unsafe_skipped = source.unsafe_skipped() + destination.unsafe_skipped();

        if self.options.dry_run {
            report.dry_run = true;
            report.planned_transfers = plan
                .to_transfer
                .iter()
                .map(|e| e.relative_path.clone())
                .collect();
            report.planned_deletions = deletion_paths(&plan);
            return Ok(report);
        }

        if !plan.to_delete.is_empty() && !self.options.force {
            let paths = deletion_paths(&plan);
            if !self.confirm_deletions(paths.clone()).await? {
                tracing::warn!(
                    count = paths.len(),
                    "Deletion not confirmed, destination-only entries are kept"
                );
                report.deletion_skipped = true;
                report.planned_deletions = paths;
                plan.to_delete.clear();
            }
        }

        self.transfer_phase(&plan, &mut report).await?;
        self.delete_phase(plan, &mut report).await?;

        tracing::info!(
            transferred = report.transferred,
            deleted = report.deleted,
            backed_up = report.backed_up,
            unchanged = report.unchanged,
            errors = report.errors.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Confirmation may block on a terminal, so it runs off the async workers
    async fn confirm_deletions(&self, paths: Vec<String>) -> Result<bool> {
        let confirm = Arc::clone(&self.confirm);
        let destination = self.job.destination().clone();
        tokio::task::spawn_blocking(move || confirm.confirm_delete(&destination, &paths))
            .await
            .map_err(|e| Error::General(format!("confirmation task failed: {e}")))
    }

    async fn preflight(&self) -> Result<()> {
        match self.job.source() {
            Location::Local(root) => match std::fs::metadata(root) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(Error::InvalidPath(format!(
                        "source is not a directory: {}",
                        root.display()
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::NotFound(format!(
                        "source directory {}",
                        root.display()
                    )));
                }
                Err(e) => return Err(Error::enumeration(root.display(), e)),
            },
            Location::Cloud(remote) => {
                let store = self.context.store_for(self.job.source(), true)?;
                check_bucket(store.as_ref(), &remote.bucket).await?;
            }
        }

        match self.job.destination() {
            Location::Local(root) => check_local_destination(root),
            Location::Cloud(remote) => {
                let store = self.context.store_for(self.job.destination(), false)?;
                check_bucket(store.as_ref(), &remote.bucket).await
            }
        }
    }

    async fn enumerate(&self, location: &Location, is_source: bool) -> Result<Snapshot> {
        let options = EnumerateOptions {
            only_current_dir: self.options.only_current_dir,
            symlinks: self.options.symlinks,
            max_entries: self.options.limits.max_sync_numbers,
            skip_dir: self.options.checkpoint_dir.clone(),
        };

        match location {
            Location::Local(root) => {
                if !is_source && !root.exists() {
                    tracing::debug!(path = %root.display(), "Destination does not exist yet");
                    return Ok(Snapshot::new());
                }
                let root = root.clone();
                let filter = self.options.filter.clone();
                tokio::task::spawn_blocking(move || enumerate_local(&root, &filter, &options))
                    .await
                    .map_err(|e| Error::enumeration(location, e))?
            }
            Location::Cloud(prefix) => {
                let store = self.context.store_for(location, is_source)?;
                enumerate_cloud(store.as_ref(), prefix, &self.options.filter, &options).await
            }
        }
    }

    async fn transfer_phase(&self, plan: &DiffResult, report: &mut SyncReport) -> Result<()> {
        if plan.to_transfer.is_empty() {
            return Ok(());
        }

        let tickets = plan
            .to_transfer
            .iter()
            .map(|entry| TransferTicket::for_entry(&self.job, entry))
            .collect::<Result<Vec<_>>>()?;

        self.observer
            .phase_started(SyncPhase::Transfer, tickets.len(), plan.transfer_bytes());
        let executor = TransferExecutor::new(Arc::clone(&self.context.transfer), self.options.routines);
        let summary = executor.run(tickets, Arc::clone(&self.observer)).await;
        self.observer.phase_finished(SyncPhase::Transfer);

        report.transferred = summary.transferred;
        report.transferred_bytes = summary.bytes;
        report.errors.extend(summary.errors);
        Ok(())
    }

    async fn delete_phase(&self, plan: DiffResult, report: &mut SyncReport) -> Result<()> {
        if plan.to_delete.is_empty() {
            return Ok(());
        }

        self.observer
            .phase_started(SyncPhase::Delete, plan.to_delete.len(), 0);
        let summary = match self.job.destination() {
            Location::Cloud(prefix) => {
                let store = self.context.store_for(self.job.destination(), false)?;
                delete_cloud(store.as_ref(), prefix, &plan.to_delete, self.observer.as_ref()).await
            }
            Location::Local(root) => {
                let root = root.clone();
                let backup = self.options.backup_dir.clone();
                let observer = Arc::clone(&self.observer);
                let entries = plan.to_delete;
                tokio::task::spawn_blocking(move || {
                    delete_local(&root, backup.as_deref(), &entries, observer.as_ref())
                })
                .await
                .map_err(|e| Error::General(format!("deletion task failed: {e}")))??
            }
        };
        self.observer.phase_finished(SyncPhase::Delete);

        apply_deletions(report, summary);
        Ok(())
    }
}

fn deletion_paths(plan: &DiffResult) -> Vec<String> {
    plan.to_delete
        .iter()
        .map(|e| e.relative_path.clone())
        .collect()
}

fn apply_deletions(report: &mut SyncReport, summary: DeletionSummary) {
    report.deleted = summary.deleted;
    report.backed_up = summary.backups.len();
    report.errors.extend(summary.errors);
}

async fn check_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    if store.bucket_exists(bucket).await? {
        Ok(())
    } else {
        Err(Error::NotFound(format!("bucket {bucket}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RemotePath;
    use crate::sync::guard::{AlwaysConfirm, NeverConfirm};
    use crate::sync::testing::{MemoryStore, MemoryTransfer};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    struct Fixture {
        _dir: TempDir,
        local: PathBuf,
        store: Arc<MemoryStore>,
        transfer: Arc<MemoryTransfer>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let local = dir.path().join("local");
            fs::create_dir_all(local.join("sub")).unwrap();
            fs::write(local.join("a.txt"), "alpha").unwrap();
            fs::write(local.join("sub/b.txt"), "beta").unwrap();

            let store = Arc::new(MemoryStore::new());
            store.create_bucket("bucket");
            let transfer = Arc::new(MemoryTransfer::new(Arc::clone(&store)));
            Self {
                _dir: dir,
                local,
                store,
                transfer,
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.local.parent().unwrap().join(name)
        }

        fn context(&self) -> SyncContext {
            SyncContext {
                source_store: Some(self.store.clone()),
                dest_store: Some(self.store.clone()),
                transfer: self.transfer.clone(),
            }
        }

        fn upload_job(&self) -> SyncJob {
            SyncJob::new(
                Location::local(&self.local),
                Location::cloud(RemotePath::new("mem", "bucket", "data")),
            )
            .unwrap()
        }

        fn download_job(&self, dest: &Path) -> SyncJob {
            SyncJob::new(
                Location::cloud(RemotePath::new("mem", "bucket", "data")),
                Location::local(dest),
            )
            .unwrap()
        }

        async fn run(&self, job: SyncJob, options: SyncOptions) -> Result<SyncReport> {
            SyncEngine::new(job, options, self.context(), Arc::new(AlwaysConfirm))
                .run()
                .await
        }
    }

    #[tokio::test]
    async fn test_upload_to_empty_destination() {
        let fx = Fixture::new();
        let report = fx.run(fx.upload_job(), SyncOptions::default()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.transferred, 2);
        assert_eq!(report.transferred_bytes, 9);
        assert_eq!(report.deleted, 0);
        assert_eq!(fx.store.keys("bucket"), vec!["data/a.txt", "data/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let fx = Fixture::new();
        let options = SyncOptions {
            delete: true,
            ..Default::default()
        };
        fx.run(fx.upload_job(), options.clone()).await.unwrap();

        let again = fx.run(fx.upload_job(), options).await.unwrap();
        assert_eq!(again.transferred, 0);
        assert_eq!(again.deleted, 0);
        assert_eq!(again.unchanged, 2);

        // And back down into a fresh directory, twice
        let out = fx.path("out");
        let first = fx
            .run(fx.download_job(&out), SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(first.transferred, 2);
        assert_eq!(fs::read_to_string(out.join("sub/b.txt")).unwrap(), "beta");

        let second = fx
            .run(fx.download_job(&out), SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(second.transferred, 0);
        assert_eq!(second.unchanged, 2);
    }

    #[tokio::test]
    async fn test_include_only_reaches_matching_files() {
        let fx = Fixture::new();
        fs::write(fx.local.join("skip.log"), "log").unwrap();
        fs::write(fx.local.join("sub/also.log"), "log").unwrap();

        let options = SyncOptions {
            filter: NameFilter::new().include("*.txt").unwrap(),
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert_eq!(report.filtered, 2);
        assert!(fx.store.keys("bucket").iter().all(|k| k.ends_with(".txt")));
        assert_eq!(report.transferred, 2);
    }

    #[tokio::test]
    async fn test_extra_destination_file_kept_without_delete() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");

        let report = fx.run(fx.upload_job(), SyncOptions::default()).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(fx.store.contains("bucket", "data/c.txt"));
    }

    #[tokio::test]
    async fn test_delete_with_backup_moves_extra_file() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/a.txt", b"alpha");
        let out = fx.path("out");
        fs::create_dir_all(out.join("old")).unwrap();
        fs::write(out.join("c.txt"), "extra").unwrap();
        fs::write(out.join("old/d.txt"), "older").unwrap();
        let backup = fx.path("bk");

        let options = SyncOptions {
            delete: true,
            force: true,
            backup_dir: Some(backup.clone()),
            ..Default::default()
        };
        let report = fx.run(fx.download_job(&out), options).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.transferred, 1);
        assert_eq!(report.backed_up, 3);
        assert!(!out.join("c.txt").exists());
        assert!(!out.join("old").exists());
        assert_eq!(fs::read_to_string(backup.join("c.txt")).unwrap(), "extra");
        assert_eq!(fs::read_to_string(backup.join("old/d.txt")).unwrap(), "older");
        assert!(out.join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_unconfirmed_delete_is_skipped() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");

        let options = SyncOptions {
            delete: true,
            ..Default::default()
        };
        let report = SyncEngine::new(fx.upload_job(), options, fx.context(), Arc::new(NeverConfirm))
            .run()
            .await
            .unwrap();

        assert!(report.deletion_skipped);
        assert_eq!(report.planned_deletions, vec!["c.txt"]);
        assert_eq!(report.transferred, 2);
        assert!(fx.store.contains("bucket", "data/c.txt"));
    }

    #[tokio::test]
    async fn test_cloud_delete_when_forced() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");

        let options = SyncOptions {
            delete: true,
            force: true,
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!fx.store.contains("bucket", "data/c.txt"));
    }

    #[tokio::test]
    async fn test_only_current_dir() {
        let fx = Fixture::new();
        let options = SyncOptions {
            only_current_dir: true,
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert_eq!(report.transferred, 1);
        assert_eq!(fx.store.keys("bucket"), vec!["data/a.txt"]);
    }

    #[tokio::test]
    async fn test_limit_exceeded_before_any_transfer() {
        let fx = Fixture::new();
        // a.txt, sub, sub/b.txt
        let options = SyncOptions {
            limits: SyncLimits {
                max_sync_numbers: 2,
            },
            ..Default::default()
        };
        let err = fx.run(fx.upload_job(), options).await.unwrap_err();

        assert!(matches!(err, Error::SyncLimitExceeded { limit: 2, .. }));
        assert!(fx.store.keys("bucket").is_empty());
    }

    #[tokio::test]
    async fn test_local_to_local_rejected_without_mutation() {
        let fx = Fixture::new();
        let out = fx.path("out");
        let err = SyncJob::resolve(
            fx.local.to_str().unwrap(),
            out.to_str().unwrap(),
        )
        .unwrap_err();

        assert!(matches!(err, Error::InvalidDirection(_)));
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");

        let options = SyncOptions {
            delete: true,
            dry_run: true,
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.planned_transfers, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(report.planned_deletions, vec!["c.txt"]);
        assert_eq!(fx.store.keys("bucket"), vec!["data/c.txt"]);
    }

    #[tokio::test]
    async fn test_transfer_failure_is_reported_and_deletes_continue() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");
        fx.transfer.fail_on("b.txt");

        let options = SyncOptions {
            delete: true,
            force: true,
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.transferred, 1);
        assert_eq!(report.failed(SyncPhase::Transfer), 1);
        assert_eq!(report.errors[0].path, "sub/b.txt");
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn test_missing_bucket_and_source() {
        let fx = Fixture::new();
        let job = SyncJob::new(
            Location::local(&fx.local),
            Location::cloud(RemotePath::new("mem", "nope", "")),
        )
        .unwrap();
        let err = fx.run(job, SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let job = SyncJob::new(
            Location::local(fx.path("missing")),
            Location::cloud(RemotePath::new("mem", "bucket", "")),
        )
        .unwrap();
        let err = fx.run(job, SyncOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_cloud_to_cloud_copy() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/a.txt", b"alpha");
        fx.store.create_bucket("mirror");

        let job = SyncJob::resolve("mem/bucket/data", "mem/mirror").unwrap();
        let report = fx.run(job.clone(), SyncOptions::default()).await.unwrap();
        assert_eq!(report.transferred, 1);
        assert_eq!(fx.store.get("mirror", "a.txt").unwrap(), b"alpha");

        let again = fx.run(job, SyncOptions::default()).await.unwrap();
        assert_eq!(again.transferred, 0);
    }

    #[tokio::test]
    async fn test_filtered_counts_source_files_once() {
        let fx = Fixture::new();
        fs::write(fx.local.join("skip.log"), "log").unwrap();
        fx.store.put("bucket", "data/skip.log", b"log");
        fx.store.put("bucket", "data/other.log", b"log");

        let options = SyncOptions {
            filter: NameFilter::new().exclude("*.log").unwrap(),
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert_eq!(report.filtered, 1);
        assert_eq!(report.transferred, 2);
    }

    #[tokio::test]
    async fn test_download_never_writes_outside_destination() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/../../escape.txt", b"outside");
        fx.store.put("bucket", "data/./dot.txt", b"dot");
        fx.store.put("bucket", "data/ok.txt", b"inside");
        let out = fx.path("nested/out");

        let report = fx
            .run(fx.download_job(&out), SyncOptions::default())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.transferred, 1);
        assert_eq!(report.unsafe_skipped, 2);
        assert_eq!(fs::read_to_string(out.join("ok.txt")).unwrap(), "inside");
        assert!(!fx.path("escape.txt").exists());
        assert!(!fx.path("nested/escape.txt").exists());
        assert!(!out.join("dot.txt").exists());
    }

    #[tokio::test]
    async fn test_only_current_dir_delete_keeps_nested_prefixes() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/sub/x.txt", b"nested");

        let options = SyncOptions {
            delete: true,
            force: true,
            only_current_dir: true,
            ..Default::default()
        };
        let report = fx.run(fx.upload_job(), options).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.deleted, 0);
        assert_eq!(report.transferred, 1);
        assert!(fx.store.contains("bucket", "data/sub/x.txt"));
        assert!(fx.store.contains("bucket", "data/a.txt"));
    }

    /// Answers only after an async task on the same runtime has replied
    struct HandshakeConfirm {
        asked: Mutex<Option<oneshot::Sender<()>>>,
        reply: Mutex<mpsc::Receiver<()>>,
    }

    impl Confirm for HandshakeConfirm {
        fn confirm_delete(&self, _destination: &Location, _paths: &[String]) -> bool {
            if let Some(asked) = self.asked.lock().unwrap().take() {
                asked.send(()).unwrap();
            }
            self.reply
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .is_ok()
        }
    }

    #[tokio::test]
    async fn test_confirmation_does_not_stall_the_runtime() {
        let fx = Fixture::new();
        fx.store.put("bucket", "data/c.txt", b"extra");

        let (asked_tx, asked_rx) = oneshot::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        tokio::spawn(async move {
            if asked_rx.await.is_ok() {
                reply_tx.send(()).unwrap();
            }
        });
        let confirm = HandshakeConfirm {
            asked: Mutex::new(Some(asked_tx)),
            reply: Mutex::new(reply_rx),
        };

        let options = SyncOptions {
            delete: true,
            ..Default::default()
        };
        let report = SyncEngine::new(fx.upload_job(), options, fx.context(), Arc::new(confirm))
            .run()
            .await
            .unwrap();

        assert!(!report.deletion_skipped);
        assert_eq!(report.deleted, 1);
        assert!(!fx.store.contains("bucket", "data/c.txt"));
    }
}
