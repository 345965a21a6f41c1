//! Storage traits
//!
//! `ObjectStore` covers listing and deletion against one endpoint;
//! `TransferPrimitive` moves object bodies. Both are SDK-independent so the
//! sync engine can be driven by in-memory fakes in tests.

use std::path::Path;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::error::Result;
use crate::path::RemotePath;

/// Metadata of one listed object or common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: Option<i64>,
    pub last_modified: Option<Timestamp>,
    /// ETag without surrounding quotes
    pub etag: Option<String>,
    pub is_dir: bool,
}

impl ObjectInfo {
    pub fn file(key: impl Into<String>, size: i64) -> Self {
        Self {
            key: key.into(),
            size_bytes: Some(size),
            last_modified: None,
            etag: None,
            is_dir: false,
        }
    }

    /// A common prefix returned by a delimited listing
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size_bytes: None,
            last_modified: None,
            etag: None,
            is_dir: true,
        }
    }
}

/// Options for one page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// List the whole subtree instead of one level
    pub recursive: bool,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<ObjectInfo>,
    pub truncated: bool,
    pub continuation_token: Option<String>,
}

/// Per-key outcome of a batch delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteObjectsResult {
    pub deleted: Vec<String>,
    /// (key, error message)
    pub failed: Vec<(String, String)>,
}

/// Listing and deletion against one S3-compatible endpoint
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of objects under `path.key`
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Delete up to 1000 keys in one request
    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<DeleteObjectsResult>;
}

/// Checkpointed single-object transfers, retried internally
///
/// Implementations own multipart splitting, retries and checkpoint files.
/// Callers only schedule work and aggregate outcomes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransferPrimitive: Send + Sync {
    async fn upload(&self, local: &Path, dest: &RemotePath) -> Result<()>;

    /// Download `src` to `local`, creating parent directories as needed
    async fn download(&self, src: &RemotePath, local: &Path) -> Result<()>;

    async fn copy(&self, src: &RemotePath, dest: &RemotePath) -> Result<()>;
}
