//! Resumable transfer state kept in the checkpoint directory
//!
//! Files at or above the big-file threshold are uploaded in parts. After
//! each part the upload id and completed part ETags are written to a JSON
//! state file, so a later run with the same file picks up where the
//! previous one stopped. Big downloads record the object's ETag next to
//! the staging file so a partial file is only extended if the object has
//! not changed since.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cs_core::{Error, RemotePath, Result};

/// Files of this size or larger use multipart upload and resumable download
pub const DEFAULT_BIGFILE_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Part size when none is requested
pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Smallest part S3 accepts for all but the last part
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// S3 limit on parts per upload
pub const MAX_PARTS: u64 = 10_000;

/// Part size for a file, honoring both S3 limits
pub fn plan_part_size(file_size: u64, requested: Option<u64>) -> u64 {
    requested
        .unwrap_or(DEFAULT_PART_SIZE)
        .max(MIN_PART_SIZE)
        .max(file_size.div_ceil(MAX_PARTS))
}

/// One slice of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based, as S3 numbers parts
    pub number: i32,
    pub offset: u64,
    pub len: u64,
}

/// Split `file_size` bytes into parts of `part_size`; the last may be shorter
pub fn part_ranges(file_size: u64, part_size: u64) -> Vec<PartRange> {
    let part_size = part_size.max(1);
    (0..file_size.div_ceil(part_size))
        .map(|i| {
            let offset = i * part_size;
            PartRange {
                number: (i + 1) as i32,
                offset,
                len: part_size.min(file_size - offset),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPartState {
    pub number: i32,
    pub etag: String,
}

/// Persisted progress of one multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadState {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub file_size: u64,
    /// Source modification time, seconds since the epoch
    pub modified: i64,
    pub part_size: u64,
    #[serde(default)]
    pub parts: Vec<CompletedPartState>,
}

impl UploadState {
    pub fn new(
        dest: &RemotePath,
        upload_id: impl Into<String>,
        file_size: u64,
        modified: i64,
        part_size: u64,
    ) -> Self {
        Self {
            bucket: dest.bucket.clone(),
            key: dest.key.clone(),
            upload_id: upload_id.into(),
            file_size,
            modified,
            part_size,
            parts: Vec::new(),
        }
    }

    /// Whether this state describes the same source file and destination
    pub fn matches(
        &self,
        dest: &RemotePath,
        file_size: u64,
        modified: i64,
        part_size: u64,
    ) -> bool {
        self.bucket == dest.bucket
            && self.key == dest.key
            && self.file_size == file_size
            && self.modified == modified
            && self.part_size == part_size
    }

    pub fn is_done(&self, number: i32) -> bool {
        self.parts.iter().any(|p| p.number == number)
    }

    pub fn record(&mut self, number: i32, etag: impl Into<String>) {
        self.parts.retain(|p| p.number != number);
        self.parts.push(CompletedPartState {
            number,
            etag: etag.into(),
        });
        self.parts.sort_by_key(|p| p.number);
    }
}

/// Object identity recorded when a resumable download starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadState {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

impl DownloadState {
    pub fn new(src: &RemotePath, size: u64, etag: Option<String>) -> Self {
        Self {
            bucket: src.bucket.clone(),
            key: src.key.clone(),
            size,
            etag,
        }
    }

    /// Bytes already staged that may be kept, given the staging file length
    ///
    /// Zero means start over. An object without an ETag is never resumed.
    pub fn resume_offset(&self, current: &DownloadState, staged: u64) -> u64 {
        if self == current && self.etag.is_some() && staged <= current.size {
            staged
        } else {
            0
        }
    }
}

/// Read a state file; a missing or unreadable file means no state
pub async fn load<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let data = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&data) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt checkpoint state");
            None
        }
    }
}

/// Write through a temporary file so a crash never leaves half a state
pub async fn save<T: Serialize>(state: &T, path: &Path) -> Result<()> {
    let data = serde_json::to_vec_pretty(state)
        .map_err(|e| Error::General(format!("encode checkpoint state: {e}")))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn remove(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove checkpoint state");
    }
}

/// State file for an upload, keyed like the download staging files
pub fn upload_state_path(checkpoint_dir: &Path, name: &str) -> PathBuf {
    checkpoint_dir.join(format!("{name}.upload.json"))
}

pub fn download_state_path(checkpoint_dir: &Path, name: &str) -> PathBuf {
    checkpoint_dir.join(format!("{name}.download.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_part_size() {
        assert_eq!(plan_part_size(200 * MIB, None), DEFAULT_PART_SIZE);
        assert_eq!(plan_part_size(200 * MIB, Some(1024)), MIN_PART_SIZE);
        assert_eq!(plan_part_size(200 * MIB, Some(64 * MIB)), 64 * MIB);

        // 100 GiB in 8 MiB parts would need 12800 parts
        let huge = 100 * 1024 * MIB;
        let size = plan_part_size(huge, None);
        assert!(huge.div_ceil(size) <= MAX_PARTS);
    }

    #[test]
    fn test_part_ranges_cover_file() {
        let parts = part_ranges(12 * MIB + 3, 5 * MIB);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], PartRange { number: 1, offset: 0, len: 5 * MIB });
        assert_eq!(parts[2].number, 3);
        assert_eq!(parts[2].offset, 10 * MIB);
        assert_eq!(parts[2].len, 2 * MIB + 3);
        assert_eq!(parts.iter().map(|p| p.len).sum::<u64>(), 12 * MIB + 3);

        assert_eq!(part_ranges(10 * MIB, 5 * MIB).len(), 2);
        assert!(part_ranges(0, 5 * MIB).is_empty());
    }

    #[test]
    fn test_state_matches_only_same_source() {
        let dest = RemotePath::new("s3", "bucket", "big.bin");
        let state = UploadState::new(&dest, "id-1", 100, 7, MIN_PART_SIZE);

        assert!(state.matches(&dest, 100, 7, MIN_PART_SIZE));
        assert!(!state.matches(&dest, 101, 7, MIN_PART_SIZE));
        assert!(!state.matches(&dest, 100, 8, MIN_PART_SIZE));
        assert!(!state.matches(&dest, 100, 7, DEFAULT_PART_SIZE));
        let other = RemotePath::new("s3", "bucket", "other.bin");
        assert!(!state.matches(&other, 100, 7, MIN_PART_SIZE));
    }

    #[test]
    fn test_record_keeps_parts_sorted_and_unique() {
        let dest = RemotePath::new("s3", "bucket", "big.bin");
        let mut state = UploadState::new(&dest, "id-1", 100, 7, MIN_PART_SIZE);
        state.record(2, "b");
        state.record(1, "a");
        state.record(2, "b2");

        assert!(state.is_done(1));
        assert!(!state.is_done(3));
        let numbers: Vec<_> = state.parts.iter().map(|p| (p.number, p.etag.as_str())).collect();
        assert_eq!(numbers, vec![(1, "a"), (2, "b2")]);
    }

    #[test]
    fn test_download_resumes_only_unchanged_object() {
        let src = RemotePath::new("s3", "bucket", "big.bin");
        let recorded = DownloadState::new(&src, 100, Some("v1".into()));

        assert_eq!(recorded.resume_offset(&recorded.clone(), 40), 40);
        assert_eq!(recorded.resume_offset(&recorded.clone(), 100), 100);
        // Longer than the object: corrupt, start over
        assert_eq!(recorded.resume_offset(&recorded.clone(), 101), 0);

        let changed = DownloadState::new(&src, 100, Some("v2".into()));
        assert_eq!(recorded.resume_offset(&changed, 40), 0);

        let untagged = DownloadState::new(&src, 100, None);
        assert_eq!(untagged.resume_offset(&untagged.clone(), 40), 0);
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = upload_state_path(dir.path(), "abc");
        let dest = RemotePath::new("s3", "bucket", "big.bin");

        let mut state = UploadState::new(&dest, "id-1", 100, 7, MIN_PART_SIZE);
        state.record(1, "etag-1");
        save(&state, &path).await.unwrap();

        let loaded: UploadState = load(&path).await.unwrap();
        assert_eq!(loaded, state);

        remove(&path).await;
        assert!(load::<UploadState>(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_state_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = download_state_path(dir.path(), "abc");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        assert!(load::<DownloadState>(&path).await.is_none());
    }
}
