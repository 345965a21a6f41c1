//! Bounded worker pool for the transfer phase
//!
//! Workers pull tickets from a shared bounded queue and hand each one to the
//! transfer primitive. Failures are recorded per ticket and never cancel
//! sibling workers. `run` returns only after every worker has exited.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use super::entry::{Entry, Fingerprint};
use super::guard::relative_to_path;
use super::location::{Location, SyncJob};
use super::report::{ItemError, SyncObserver, SyncPhase};
use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::traits::TransferPrimitive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOp {
    Upload { local: PathBuf, dest: RemotePath },
    Download { src: RemotePath, local: PathBuf },
    Copy { src: RemotePath, dest: RemotePath },
}

/// One unit of work for the transfer phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTicket {
    pub relative_path: String,
    pub size: i64,
    pub fingerprint: Fingerprint,
    pub op: TransferOp,
}

impl TransferTicket {
    /// Resolve both endpoints of `entry` for the job's direction
    pub fn for_entry(job: &SyncJob, entry: &Entry) -> Result<Self> {
        let rel = entry.relative_path.as_str();
        let op = match (job.source(), job.destination()) {
            (Location::Local(root), Location::Cloud(dest)) => TransferOp::Upload {
                local: root.join(relative_to_path(rel)?),
                dest: dest.join(rel),
            },
            (Location::Cloud(src), Location::Local(root)) => TransferOp::Download {
                src: src.join(rel),
                local: root.join(relative_to_path(rel)?),
            },
            (Location::Cloud(src), Location::Cloud(dest)) => TransferOp::Copy {
                src: src.join(rel),
                dest: dest.join(rel),
            },
            (Location::Local(_), Location::Local(_)) => {
                return Err(Error::InvalidDirection(
                    "no transfer between two local directories".into(),
                ));
            }
        };

        Ok(Self {
            relative_path: entry.relative_path.clone(),
            size: entry.size,
            fingerprint: entry.fingerprint.clone(),
            op,
        })
    }

    fn bytes(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransferSummary {
    pub transferred: usize,
    pub bytes: u64,
    pub errors: Vec<ItemError>,
}

pub struct TransferExecutor {
    primitive: Arc<dyn TransferPrimitive>,
    routines: usize,
}

#[derive(Default)]
struct Counters {
    transferred: AtomicUsize,
    bytes: AtomicU64,
}

impl TransferExecutor {
    pub fn new(primitive: Arc<dyn TransferPrimitive>, routines: usize) -> Self {
        Self {
            primitive,
            routines: routines.max(1),
        }
    }

    pub fn routines(&self) -> usize {
        self.routines
    }

    /// Execute every ticket and wait for all workers to finish
    pub async fn run(
        &self,
        tickets: Vec<TransferTicket>,
        observer: Arc<dyn SyncObserver>,
    ) -> TransferSummary {
        if tickets.is_empty() {
            return TransferSummary::default();
        }

        let workers_needed = self.routines.min(tickets.len());
        let (tx, rx) = mpsc::channel::<TransferTicket>(workers_needed * 2);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut workers = JoinSet::new();
        for id in 0..workers_needed {
            workers.spawn(worker(
                id,
                Arc::clone(&rx),
                Arc::clone(&self.primitive),
                Arc::clone(&observer),
                Arc::clone(&counters),
            ));
        }

        let mut errors = Vec::new();
        let mut pending = tickets.into_iter();
        while let Some(ticket) = pending.next() {
            if let Err(mpsc::error::SendError(ticket)) = tx.send(ticket).await {
                // Every worker is gone; account for what was never scheduled
                for lost in std::iter::once(ticket).chain(pending.by_ref()) {
                    errors.push(ItemError::new(
                        lost.relative_path,
                        SyncPhase::Transfer,
                        "transfer workers stopped before this item was scheduled",
                    ));
                }
                break;
            }
        }
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(mut worker_errors) => errors.append(&mut worker_errors),
                Err(e) => {
                    tracing::error!(error = %e, "Transfer worker aborted");
                    errors.push(ItemError::new(
                        "<worker>",
                        SyncPhase::Transfer,
                        format!("worker aborted: {e}"),
                    ));
                }
            }
        }
        errors.sort_by(|a, b| a.path.cmp(&b.path));

        TransferSummary {
            transferred: counters.transferred.load(Ordering::SeqCst),
            bytes: counters.bytes.load(Ordering::SeqCst),
            errors,
        }
    }
}

async fn worker(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<TransferTicket>>>,
    primitive: Arc<dyn TransferPrimitive>,
    observer: Arc<dyn SyncObserver>,
    counters: Arc<Counters>,
) -> Vec<ItemError> {
    let mut errors = Vec::new();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(ticket) = next else {
            break;
        };

        match execute(primitive.as_ref(), &ticket.op).await {
            Ok(()) => {
                counters.transferred.fetch_add(1, Ordering::SeqCst);
                counters.bytes.fetch_add(ticket.bytes(), Ordering::SeqCst);
                tracing::debug!(worker = id, path = %ticket.relative_path, "Transferred");
                observer.item_finished(SyncPhase::Transfer, &ticket.relative_path, ticket.bytes(), None);
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(worker = id, path = %ticket.relative_path, error = %message, "Transfer failed");
                observer.item_finished(
                    SyncPhase::Transfer,
                    &ticket.relative_path,
                    ticket.bytes(),
                    Some(&message),
                );
                errors.push(ItemError::new(ticket.relative_path, SyncPhase::Transfer, message));
            }
        }
    }

    errors
}

async fn execute(primitive: &dyn TransferPrimitive, op: &TransferOp) -> Result<()> {
    match op {
        TransferOp::Upload { local, dest } => primitive.upload(local, dest).await,
        TransferOp::Download { src, local } => primitive.download(src, local).await,
        TransferOp::Copy { src, dest } => primitive.copy(src, dest).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::report::NoopObserver;
    use crate::traits::MockTransferPrimitive;
    use async_trait::async_trait;
    use std::path::Path;

    fn upload_job() -> SyncJob {
        SyncJob::new(
            Location::local("/data"),
            Location::cloud(RemotePath::new("s3", "bucket", "backup")),
        )
        .unwrap()
    }

    fn tickets(n: usize) -> Vec<TransferTicket> {
        let job = upload_job();
        (0..n)
            .map(|i| {
                let entry = Entry::file(format!("f{i}.txt"), 10, Default::default());
                TransferTicket::for_entry(&job, &entry).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_ticket_endpoints() {
        let entry = Entry::file("sub/a.txt", 4, Default::default());

        let ticket = TransferTicket::for_entry(&upload_job(), &entry).unwrap();
        assert_eq!(
            ticket.op,
            TransferOp::Upload {
                local: PathBuf::from("/data/sub/a.txt"),
                dest: RemotePath::new("s3", "bucket", "backup/sub/a.txt"),
            }
        );

        let download = SyncJob::resolve("s3/bucket", "/out").unwrap();
        let ticket = TransferTicket::for_entry(&download, &entry).unwrap();
        assert_eq!(
            ticket.op,
            TransferOp::Download {
                src: RemotePath::new("s3", "bucket", "sub/a.txt"),
                local: PathBuf::from("/out/sub/a.txt"),
            }
        );

        let copy = SyncJob::resolve("s3/a/x", "other/b").unwrap();
        let ticket = TransferTicket::for_entry(&copy, &entry).unwrap();
        assert_eq!(
            ticket.op,
            TransferOp::Copy {
                src: RemotePath::new("s3", "a", "x/sub/a.txt"),
                dest: RemotePath::new("other", "b", "sub/a.txt"),
            }
        );
    }

    #[test]
    fn test_download_ticket_refuses_parent_segments() {
        let download = SyncJob::resolve("s3/bucket", "/out").unwrap();
        let entry = Entry::file("data/../../escape.txt", 1, Default::default());

        let err = TransferTicket::for_entry(&download, &entry).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_all_tickets_transferred() {
        let mut mock = MockTransferPrimitive::new();
        mock.expect_upload().times(5).returning(|_, _| Ok(()));

        let executor = TransferExecutor::new(Arc::new(mock), 3);
        let summary = executor.run(tickets(5), Arc::new(NoopObserver)).await;

        assert_eq!(summary.transferred, 5);
        assert_eq!(summary.bytes, 50);
        assert!(summary.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_siblings() {
        let mut mock = MockTransferPrimitive::new();
        mock.expect_upload()
            .withf(|local: &Path, _: &RemotePath| local.ends_with("f2.txt"))
            .returning(|_, _| Err(Error::Network("connection reset".into())));
        mock.expect_upload().returning(|_, _| Ok(()));

        let executor = TransferExecutor::new(Arc::new(mock), 2);
        let summary = executor.run(tickets(4), Arc::new(NoopObserver)).await;

        assert_eq!(summary.transferred, 3);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].path, "f2.txt");
        assert_eq!(summary.errors[0].phase, SyncPhase::Transfer);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let executor = TransferExecutor::new(Arc::new(MockTransferPrimitive::new()), 4);
        let summary = executor.run(Vec::new(), Arc::new(NoopObserver)).await;
        assert_eq!(summary.transferred, 0);
        assert!(summary.errors.is_empty());
    }

    struct SlowPrimitive {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TransferPrimitive for SlowPrimitive {
        async fn upload(&self, _local: &Path, _dest: &RemotePath) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn download(&self, _src: &RemotePath, _local: &Path) -> Result<()> {
            unreachable!()
        }

        async fn copy(&self, _src: &RemotePath, _dest: &RemotePath) -> Result<()> {
            unreachable!()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bounded_by_routines() {
        let primitive = Arc::new(SlowPrimitive {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let executor = TransferExecutor::new(primitive.clone(), 3);
        let summary = executor.run(tickets(20), Arc::new(NoopObserver)).await;

        assert_eq!(summary.transferred, 20);
        assert!(primitive.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(primitive.in_flight.load(Ordering::SeqCst), 0);
    }
}
