//! Transfer primitive backed by S3 clients
//!
//! Downloads are staged in the checkpoint directory, one file per object,
//! and renamed into place only once complete, so an interrupted run never
//! leaves a truncated file at the destination. Files at or above the
//! big-file threshold are uploaded in parts and downloaded with ranged
//! requests, both resuming from the state kept in the checkpoint directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use cs_core::{
    Error, RemotePath, Result, RetryConfig, TransferPrimitive, is_retryable_error,
    retry_with_backoff,
};

use crate::checkpoint::{
    self, DEFAULT_BIGFILE_THRESHOLD, DownloadState, UploadState, download_state_path,
    part_ranges, plan_part_size, upload_state_path,
};
use crate::client::{ObjectHead, S3Client};

/// Default checkpoint directory, relative to the working directory
pub const DEFAULT_CHECKPOINT_DIR: &str = ".cs_checkpoint";

pub struct S3Transfer {
    clients: HashMap<String, Arc<S3Client>>,
    checkpoint_dir: PathBuf,
    retry_override: Option<u32>,
    bigfile_threshold: u64,
    part_size: Option<u64>,
}

impl S3Transfer {
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            clients: HashMap::new(),
            checkpoint_dir: checkpoint_dir.into(),
            retry_override: None,
            bigfile_threshold: DEFAULT_BIGFILE_THRESHOLD,
            part_size: None,
        }
    }

    /// Register the client used for locations under its alias
    pub fn with_client(mut self, client: Arc<S3Client>) -> Self {
        self.clients.insert(client.alias().name.clone(), client);
        self
    }

    /// Override every alias's attempt count
    pub fn with_retry_times(mut self, attempts: Option<u32>) -> Self {
        self.retry_override = attempts;
        self
    }

    /// Files this large or larger are transferred resumably
    pub fn with_bigfile_threshold(mut self, bytes: u64) -> Self {
        self.bigfile_threshold = bytes;
        self
    }

    /// Multipart part size; derived from the file size when unset
    pub fn with_part_size(mut self, bytes: Option<u64>) -> Self {
        self.part_size = bytes;
        self
    }

    /// Empty files never take the multipart path
    fn is_big(&self, size: u64) -> bool {
        size > 0 && size >= self.bigfile_threshold
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    fn client(&self, alias: &str) -> Result<&Arc<S3Client>> {
        self.clients
            .get(alias)
            .ok_or_else(|| Error::AliasNotFound(alias.to_string()))
    }

    fn retry_config(&self, client: &S3Client) -> RetryConfig {
        let mut builder = cs_core::RetryBuilder::from_config(client.alias().retry_config());
        if let Some(attempts) = self.retry_override {
            builder = builder.max_attempts(attempts);
        }
        builder.build()
    }

    /// Staging file for one object; stable across runs
    fn staging_path(&self, src: &RemotePath) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{}.part", staging_name(src)))
    }

    async fn download_to_staging(&self, src: &RemotePath) -> Result<PathBuf> {
        let client = self.client(&src.alias)?;
        tokio::fs::create_dir_all(&self.checkpoint_dir).await?;
        let staging = self.staging_path(src);
        let retry = self.retry_config(client);
        let label = src.to_string();

        let head =
            retry_with_backoff(&retry, &label, || client.head_object(src), is_retryable_error)
                .await?;

        if !self.is_big(head.size) {
            retry_with_backoff(
                &retry,
                &label,
                || client.get_to_file(src, &staging),
                is_retryable_error,
            )
            .await?;
            return Ok(staging);
        }

        let state_path = download_state_path(&self.checkpoint_dir, &staging_name(src));
        let current = DownloadState::new(src, head.size, head.etag.clone());
        let staged = staged_len(&staging).await;
        let offset = match checkpoint::load::<DownloadState>(&state_path).await {
            Some(recorded) => recorded.resume_offset(&current, staged),
            None => 0,
        };
        if offset > 0 {
            tracing::info!(object = %src, offset, size = head.size, "Resuming download");
        } else {
            checkpoint::save(&current, &state_path).await?;
        }

        // Each attempt continues from whatever the previous one staged
        let staging_ref = staging.as_path();
        let head_ref = &head;
        let mut first = Some(offset);
        retry_with_backoff(
            &retry,
            &label,
            move || {
                let resume = first.take();
                async move {
                    let offset = match resume {
                        Some(offset) => offset,
                        None => staged_len(staging_ref).await,
                    };
                    fetch_from(client, src, staging_ref, head_ref, offset).await
                }
            },
            is_retryable_error,
        )
        .await?;

        checkpoint::remove(&state_path).await;
        Ok(staging)
    }

    /// Multipart upload that records every finished part
    async fn upload_multipart(
        &self,
        client: &S3Client,
        local: &Path,
        dest: &RemotePath,
        size: u64,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.checkpoint_dir).await?;
        let retry = self.retry_config(client);
        let label = dest.to_string();
        let part_size = plan_part_size(size, self.part_size);
        let modified = modified_secs(local).await?;
        let state_path = upload_state_path(&self.checkpoint_dir, &staging_name(dest));

        let mut state = match checkpoint::load::<UploadState>(&state_path).await {
            Some(state) if state.matches(dest, size, modified, part_size) => {
                tracing::info!(
                    object = %dest,
                    done = state.parts.len(),
                    "Resuming multipart upload"
                );
                state
            }
            stale => {
                if let Some(stale) = stale
                    && let Err(e) = client.abort_multipart_upload(dest, &stale.upload_id).await
                {
                    tracing::debug!(object = %dest, error = %e, "Could not abort stale upload");
                }
                let upload_id = retry_with_backoff(
                    &retry,
                    &label,
                    || client.create_multipart_upload(dest, local),
                    is_retryable_error,
                )
                .await?;
                let state = UploadState::new(dest, upload_id, size, modified, part_size);
                checkpoint::save(&state, &state_path).await?;
                state
            }
        };

        let result = async {
            for part in part_ranges(size, part_size) {
                if state.is_done(part.number) {
                    continue;
                }
                let part_label = format!("{label} part {}", part.number);
                let etag = retry_with_backoff(
                    &retry,
                    &part_label,
                    || client.upload_part(dest, &state.upload_id, local, part),
                    is_retryable_error,
                )
                .await?;
                state.record(part.number, etag);
                checkpoint::save(&state, &state_path).await?;
            }

            retry_with_backoff(
                &retry,
                &label,
                || client.complete_multipart_upload(dest, &state.upload_id, &state.parts),
                is_retryable_error,
            )
            .await
        }
        .await;

        match &result {
            Ok(()) => checkpoint::remove(&state_path).await,
            // The upload id is gone server-side; the next run starts over
            Err(Error::NotFound(_)) => checkpoint::remove(&state_path).await,
            Err(_) => {}
        }
        result
    }
}

/// Length of a staging file, zero when absent
async fn staged_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn fetch_from(
    client: &S3Client,
    src: &RemotePath,
    staging: &Path,
    head: &ObjectHead,
    offset: u64,
) -> Result<()> {
    // A partial file longer than the object cannot be extended
    let offset = if offset > head.size { 0 } else { offset };
    if offset > 0 && offset == head.size {
        return Ok(());
    }
    client.get_range_to_file(src, staging, offset).await?;
    Ok(())
}

async fn modified_secs(local: &Path) -> Result<i64> {
    let modified = tokio::fs::metadata(local).await?.modified()?;
    Ok(jiff::Timestamp::try_from(modified)
        .map(|t| t.as_second())
        .unwrap_or(0))
}

fn staging_name(src: &RemotePath) -> String {
    let mut hasher = Sha256::new();
    hasher.update(src.bucket.as_bytes());
    hasher.update(b"/");
    hasher.update(src.key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Rename, falling back to copy and remove across filesystems
async fn move_into_place(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if let Err(e) = tokio::fs::rename(from, to).await {
        tracing::debug!(from = %from.display(), error = %e, "Rename failed, copying instead");
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

#[async_trait]
impl TransferPrimitive for S3Transfer {
    async fn upload(&self, local: &Path, dest: &RemotePath) -> Result<()> {
        let client = self.client(&dest.alias)?;
        let size = tokio::fs::metadata(local).await?.len();
        if self.is_big(size) {
            return self.upload_multipart(client, local, dest, size).await;
        }

        let label = dest.to_string();
        retry_with_backoff(
            &self.retry_config(client),
            &label,
            || client.put_file(dest, local),
            is_retryable_error,
        )
        .await
    }

    async fn download(&self, src: &RemotePath, local: &Path) -> Result<()> {
        let staging = self.download_to_staging(src).await?;
        move_into_place(&staging, local).await
    }

    async fn copy(&self, src: &RemotePath, dest: &RemotePath) -> Result<()> {
        if src.alias == dest.alias {
            let client = self.client(&src.alias)?;
            let label = format!("{src} -> {dest}");
            return retry_with_backoff(
                &self.retry_config(client),
                &label,
                || client.copy_object(src, dest),
                is_retryable_error,
            )
            .await;
        }

        // Different endpoints: relay through the staging file
        let staging = self.download_to_staging(src).await?;
        let uploaded = self.upload(&staging, dest).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await {
            tracing::debug!(path = %staging.display(), error = %e, "Could not remove staging file");
        }
        uploaded
    }
}
