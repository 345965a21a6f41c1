//! In-memory object store and transfer primitive for engine tests

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jiff::Timestamp;

use crate::error::{Error, Result};
use crate::path::RemotePath;
use crate::traits::{DeleteObjectsResult, ListOptions, ListResult, ObjectInfo, ObjectStore, TransferPrimitive};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    modified: Timestamp,
    etag: String,
}

fn etag(data: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Buckets of objects keyed by (bucket, key)
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<BTreeSet<String>>,
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    page_size: Option<usize>,
    failing_listings: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<(String, String)>>,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every listing page at `page_size` items
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.lock().unwrap().insert(bucket.to_string());
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.create_bucket(bucket);
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                modified: Timestamp::now(),
                etag: etag(data),
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).is_some()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn fail_listing(&self, bucket: &str) {
        self.create_bucket(bucket);
        self.failing_listings
            .lock()
            .unwrap()
            .insert(bucket.to_string());
    }

    pub fn fail_delete(&self, bucket: &str, key: &str) {
        self.failing_deletes
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()));
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn copy_object(&self, src: &RemotePath, dest: &RemotePath) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get(&(src.bucket.clone(), src.key.clone()))
            .cloned()
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        objects.insert(
            (dest.bucket.clone(), dest.key.clone()),
            StoredObject {
                modified: Timestamp::now(),
                ..object
            },
        );
        drop(objects);
        self.create_bucket(&dest.bucket);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        if self.failing_listings.lock().unwrap().contains(&path.bucket) {
            return Err(Error::Network("listing failed".into()));
        }

        let mut items = Vec::new();
        let mut prefixes = BTreeSet::new();
        for ((bucket, key), object) in self.objects.lock().unwrap().iter() {
            if bucket != &path.bucket {
                continue;
            }
            let Some(rest) = key.strip_prefix(path.key.as_str()) else {
                continue;
            };
            if !options.recursive
                && let Some(idx) = rest.find('/')
                && idx + 1 < rest.len()
            {
                if prefixes.insert(format!("{}{}", path.key, &rest[..=idx])) {
                    items.push(ObjectInfo::dir(format!("{}{}", path.key, &rest[..=idx])));
                }
                continue;
            }
            items.push(ObjectInfo {
                key: key.clone(),
                size_bytes: Some(object.data.len() as i64),
                last_modified: Some(object.modified),
                etag: Some(object.etag.clone()),
                is_dir: false,
            });
        }

        let start: usize = match options.continuation_token {
            Some(token) => token.parse().map_err(|_| Error::General("bad token".into()))?,
            None => 0,
        };
        let limit = [
            self.page_size,
            options.max_keys.and_then(|m| usize::try_from(m).ok()),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(usize::MAX);

        let end = start.saturating_add(limit).min(items.len());
        let truncated = end < items.len();
        Ok(ListResult {
            items: items[start.min(end)..end].to_vec(),
            truncated,
            continuation_token: truncated.then(|| end.to_string()),
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.buckets.lock().unwrap().contains(bucket))
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<DeleteObjectsResult> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_deletes.lock().unwrap().clone();
        let mut objects = self.objects.lock().unwrap();
        let mut result = DeleteObjectsResult::default();
        for key in keys {
            let id = (bucket.to_string(), key);
            if failing.contains(&id) {
                result.failed.push((id.1, "AccessDenied".into()));
            } else {
                objects.remove(&id);
                result.deleted.push(id.1);
            }
        }
        Ok(result)
    }
}

/// Transfers against a `MemoryStore`, failing for keys or paths ending in
/// a configured suffix
pub struct MemoryTransfer {
    store: std::sync::Arc<MemoryStore>,
    fail_suffixes: Mutex<Vec<String>>,
}

impl MemoryTransfer {
    pub fn new(store: std::sync::Arc<MemoryStore>) -> Self {
        Self {
            store,
            fail_suffixes: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, suffix: &str) {
        self.fail_suffixes.lock().unwrap().push(suffix.to_string());
    }

    fn check(&self, name: &str) -> Result<()> {
        if self
            .fail_suffixes
            .lock()
            .unwrap()
            .iter()
            .any(|s| name.ends_with(s.as_str()))
        {
            return Err(Error::Network(format!("injected failure for {name}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TransferPrimitive for MemoryTransfer {
    async fn upload(&self, local: &Path, dest: &RemotePath) -> Result<()> {
        self.check(&dest.key)?;
        let data = std::fs::read(local)?;
        self.store.put(&dest.bucket, &dest.key, &data);
        Ok(())
    }

    async fn download(&self, src: &RemotePath, local: &Path) -> Result<()> {
        self.check(&src.key)?;
        let data = self
            .store
            .get(&src.bucket, &src.key)
            .ok_or_else(|| Error::NotFound(src.to_string()))?;
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local, data)?;
        Ok(())
    }

    async fn copy(&self, src: &RemotePath, dest: &RemotePath) -> Result<()> {
        self.check(&src.key)?;
        self.store.copy_object(src, dest)
    }
}
