//! sync command - make a destination match a source
//!
//! Exactly one side may be local. Files missing or outdated at the
//! destination are transferred; with `--delete`, destination-only entries
//! are removed (or moved into `--backup-dir` for a local destination).

use std::collections::HashMap;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use cs_core::sync::{
    AlwaysConfirm, Confirm, Location, NameFilter, NeverConfirm, SymlinkPolicy, SyncContext,
    SyncEngine, SyncJob, SyncLimits, SyncObserver, SyncOptions, SyncPhase, SyncReport,
};
use cs_core::{AliasManager, Config, ConfigManager, Error, ObjectStore};
use cs_s3::{DEFAULT_BIGFILE_THRESHOLD, DEFAULT_CHECKPOINT_DIR, S3Client, S3Transfer};

/// Paths listed in the confirmation prompt before eliding the rest
const PROMPT_PATH_LIMIT: usize = 20;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source: a local directory or alias/bucket[/prefix]
    pub source: String,

    /// Destination: a local directory or alias/bucket[/prefix]
    pub destination: String,

    /// Remove destination entries that do not exist in the source
    #[arg(long)]
    pub delete: bool,

    /// Delete without asking for confirmation
    #[arg(short, long)]
    pub force: bool,

    /// Move deleted local files here instead of removing them (requires --delete)
    #[arg(long, value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Only sync files whose name matches this pattern (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Skip files whose name matches this pattern (repeatable)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub only_current_dir: bool,

    /// Ignore every symbolic link
    #[arg(long, conflicts_with = "enable_symlink_dir")]
    pub disable_all_symlink: bool,

    /// Follow symbolic links to directories
    #[arg(long)]
    pub enable_symlink_dir: bool,

    /// Number of concurrent transfers
    #[arg(long, value_name = "N")]
    pub routines: Option<usize>,

    /// Show what would be done without doing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Abort when either side holds more entries than this
    #[arg(long, value_name = "N")]
    pub max_sync_numbers: Option<usize>,

    /// Directory for partial downloads and multipart upload state
    #[arg(long, value_name = "DIR")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Files of at least this many bytes are transferred in resumable parts
    #[arg(long, value_name = "BYTES")]
    pub bigfile_threshold: Option<u64>,

    /// Multipart part size in bytes (at least 5 MiB)
    #[arg(long, value_name = "BYTES")]
    pub part_size: Option<u64>,

    /// Write a report of failed items into this directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Attempts per object transfer, overriding the alias setting
    #[arg(long, value_name = "N")]
    pub retry_times: Option<u32>,
}

#[derive(Serialize)]
struct SyncOutput<'a> {
    #[serde(flatten)]
    report: &'a SyncReport,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_file: Option<String>,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let config = match ConfigManager::new().and_then(|m| m.load()) {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&format!("Failed to load config: {e}"));
            return ExitCode::GeneralError;
        }
    };

    let job = match SyncJob::resolve(&args.source, &args.destination) {
        Ok(job) => job,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let filter = match NameFilter::from_patterns(&args.include, &args.exclude) {
        Ok(filter) => filter,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::UsageError;
        }
    };

    let options = build_options(&args, &config, filter);
    let tuning = TransferTuning::from_args(&args, &config);
    let context = match build_context(&job, &options, tuning).await {
        Ok(context) => context,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    let confirm: Arc<dyn Confirm> = if args.force {
        Arc::new(AlwaysConfirm)
    } else if std::io::stdin().is_terminal() && !formatter.is_json() {
        Arc::new(PromptConfirm)
    } else {
        Arc::new(NeverConfirm)
    };

    let mut engine = SyncEngine::new(job, options, context, confirm);
    if formatter.progress_enabled() {
        engine = engine.with_observer(Arc::new(ProgressObserver::default()));
    }

    let report = match engine.run().await {
        Ok(report) => report,
        Err(e) => {
            formatter.error(&e.to_string());
            return exit_code_for(&e, engine.job());
        }
    };

    let mut report_file = None;
    if !report.errors.is_empty()
        && let Some(dir) = &args.output_dir
    {
        match write_report(dir, &report) {
            Ok(path) => report_file = Some(path.display().to_string()),
            Err(e) => formatter.warning(&format!("{e:#}")),
        }
    }

    if formatter.is_json() {
        formatter.json(&SyncOutput {
            report: &report,
            success: report.is_success(),
            report_file,
        });
    } else {
        print_report(&formatter, &report, report_file.as_deref());
    }

    if report.is_success() {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    }
}

fn build_options(args: &SyncArgs, config: &Config, filter: NameFilter) -> SyncOptions {
    let checkpoint_dir = args
        .checkpoint_dir
        .clone()
        .or_else(|| config.sync.checkpoint_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR));

    SyncOptions {
        delete: args.delete,
        force: args.force,
        dry_run: args.dry_run,
        backup_dir: args.backup_dir.clone(),
        filter,
        only_current_dir: args.only_current_dir,
        symlinks: SymlinkPolicy::from_flags(args.disable_all_symlink, args.enable_symlink_dir),
        routines: args.routines.unwrap_or(config.sync.routines).max(1),
        limits: SyncLimits {
            max_sync_numbers: args
                .max_sync_numbers
                .unwrap_or(config.sync.max_sync_numbers),
        },
        checkpoint_dir: Some(checkpoint_dir),
    }
}

/// Settings handed to the transfer primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransferTuning {
    retry_times: Option<u32>,
    bigfile_threshold: u64,
    part_size: Option<u64>,
}

impl TransferTuning {
    fn from_args(args: &SyncArgs, config: &Config) -> Self {
        Self {
            retry_times: args.retry_times,
            bigfile_threshold: args
                .bigfile_threshold
                .or(config.sync.bigfile_threshold)
                .unwrap_or(DEFAULT_BIGFILE_THRESHOLD),
            part_size: args.part_size.or(config.sync.part_size),
        }
    }
}

/// Connect one S3 client per alias named by the job
async fn build_context(
    job: &SyncJob,
    options: &SyncOptions,
    tuning: TransferTuning,
) -> cs_core::Result<SyncContext> {
    let manager = AliasManager::new()?;
    let mut clients: HashMap<String, Arc<S3Client>> = HashMap::new();

    let source_store = connect(&manager, &mut clients, job.source()).await?;
    let dest_store = connect(&manager, &mut clients, job.destination()).await?;

    let checkpoint_dir = options
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CHECKPOINT_DIR));
    let transfer = clients.into_values().fold(
        S3Transfer::new(checkpoint_dir)
            .with_retry_times(tuning.retry_times)
            .with_bigfile_threshold(tuning.bigfile_threshold)
            .with_part_size(tuning.part_size),
        S3Transfer::with_client,
    );

    Ok(SyncContext {
        source_store,
        dest_store,
        transfer: Arc::new(transfer),
    })
}

async fn connect(
    manager: &AliasManager,
    clients: &mut HashMap<String, Arc<S3Client>>,
    location: &Location,
) -> cs_core::Result<Option<Arc<dyn ObjectStore>>> {
    let Some(remote) = location.as_cloud() else {
        return Ok(None);
    };

    let client = match clients.get(&remote.alias) {
        Some(client) => Arc::clone(client),
        None => {
            let alias = manager.get(&remote.alias)?;
            let client = Arc::new(S3Client::new(alias).await?);
            clients.insert(remote.alias.clone(), Arc::clone(&client));
            client
        }
    };
    Ok(Some(client))
}

/// Listing failures are network errors on the cloud side only
fn exit_code_for(error: &Error, job: &SyncJob) -> ExitCode {
    if let Error::Enumeration { location, .. } = error {
        let local = [job.source(), job.destination()]
            .into_iter()
            .any(|l| l.is_local() && l.to_string() == *location);
        if local {
            return ExitCode::GeneralError;
        }
    }
    ExitCode::from_error(error)
}

fn write_report(dir: &Path, report: &SyncReport) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    let stamp = jiff::Zoned::now().strftime("%Y%m%d_%H%M%S");
    let path = dir.join(format!("cs_report_{stamp}.report"));

    let mut body = String::new();
    for error in &report.errors {
        body.push_str(&format!(
            "[Error] {} {}: {}\n",
            error.phase, error.path, error.message
        ));
    }
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(path)
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn print_report(formatter: &Formatter, report: &SyncReport, report_file: Option<&str>) {
    if report.dry_run {
        formatter.println(&format!(
            "Dry run: {} would be transferred, {} would be deleted, {} unchanged",
            report.planned_transfers.len(),
            report.planned_deletions.len(),
            report.unchanged
        ));
        for path in &report.planned_transfers {
            formatter.println(&format!("  + {}", formatter.style_path(path)));
        }
        for path in &report.planned_deletions {
            formatter.println(&format!("  - {}", formatter.style_path(path)));
        }
        return;
    }

    if report.deletion_skipped {
        formatter.warning(&format!(
            "Deletion not confirmed, {} destination-only entries kept (use --force to delete)",
            report.planned_deletions.len()
        ));
    }

    if report.unsafe_skipped > 0 {
        formatter.warning(&format!(
            "{} cloud keys skipped because they do not map to a relative path",
            report.unsafe_skipped
        ));
    }

    for error in &report.errors {
        formatter.error(&format!(
            "{} {}: {}",
            error.phase,
            formatter.style_path(&error.path),
            error.message
        ));
    }

    let summary = format!(
        "Sync complete: {} transferred ({}), {} deleted, {} backed up, {} unchanged, {} filtered, {} errors",
        report.transferred,
        formatter.style_size(&format_size(report.transferred_bytes)),
        report.deleted,
        report.backed_up,
        report.unchanged,
        report.filtered,
        report.errors.len()
    );
    if report.is_success() {
        formatter.success(&summary);
    } else {
        formatter.println(&summary);
    }

    if let Some(file) = report_file {
        formatter.println(&formatter.style_detail(&format!("Error report written to {file}")));
    }
}

/// Interactive y/N prompt on the terminal
struct PromptConfirm;

impl Confirm for PromptConfirm {
    // Called from a blocking task, never on an async worker
    fn confirm_delete(&self, destination: &Location, paths: &[String]) -> bool {
        prompt_delete(
            std::io::stdin().lock(),
            std::io::stderr().lock(),
            destination,
            paths,
        )
    }
}

fn prompt_delete(
    mut input: impl BufRead,
    mut out: impl Write,
    destination: &Location,
    paths: &[String],
) -> bool {
    let _ = writeln!(
        out,
        "The following {} entries will be deleted from {destination}:",
        paths.len()
    );
    for path in paths.iter().take(PROMPT_PATH_LIMIT) {
        let _ = writeln!(out, "  {path}");
    }
    if paths.len() > PROMPT_PATH_LIMIT {
        let _ = writeln!(out, "  ... and {} more", paths.len() - PROMPT_PATH_LIMIT);
    }
    let _ = write!(out, "Proceed? [y/N] ");
    let _ = out.flush();

    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read confirmation");
            false
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Draws one progress bar per mutating phase
#[derive(Default)]
struct ProgressObserver {
    bar: Mutex<Option<ProgressBar>>,
}

impl SyncObserver for ProgressObserver {
    fn phase_started(&self, phase: SyncPhase, items: usize, _bytes: u64) {
        let pb = ProgressBar::new(items as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Valid template")
                .progress_chars("#>-"),
        );
        pb.set_message(match phase {
            SyncPhase::Transfer => "Transferring...",
            SyncPhase::Delete => "Deleting...",
        });
        if let Ok(mut bar) = self.bar.lock() {
            *bar = Some(pb);
        }
    }

    fn item_finished(&self, _phase: SyncPhase, _path: &str, _bytes: u64, _error: Option<&str>) {
        if let Ok(bar) = self.bar.lock()
            && let Some(pb) = bar.as_ref()
        {
            pb.inc(1);
        }
    }

    fn phase_finished(&self, _phase: SyncPhase) {
        if let Ok(mut bar) = self.bar.lock()
            && let Some(pb) = bar.take()
        {
            pb.finish_and_clear();
        }
    }
}
