//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from cs-core. The
//! single-object body operations used by the transfer primitive live here
//! too, as inherent methods.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use cs_core::{
    Alias, DeleteObjectsResult, Error, ListOptions, ListResult, ObjectInfo, ObjectStore,
    RemotePath, Result,
};

use crate::checkpoint::{CompletedPartState, PartRange};

/// Size and version tag of a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
}

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
    alias: Alias,
}

impl S3Client {
    /// Create a new S3 client from an alias configuration
    pub async fn new(alias: Alias) -> Result<Self> {
        let credentials = aws_credential_types::Credentials::new(
            alias.access_key.clone(),
            alias.secret_key.clone(),
            None, // session token
            None, // expiry
            "cs-static-credentials",
        );

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(aws_config::Region::new(alias.region.clone()))
            .endpoint_url(&alias.endpoint)
            .load()
            .await;

        // Path-style addressing unless the alias asks for virtual hosts
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(alias.bucket_lookup != "dns")
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
            alias,
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    pub fn alias(&self) -> &Alias {
        &self.alias
    }

    /// Format AWS SDK error into a detailed error message
    fn format_sdk_error<E: std::fmt::Display>(error: &aws_sdk_s3::error::SdkError<E>) -> String {
        match error {
            aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
                let err = service_err.err();
                let meta = service_err.raw();
                let mut msg = format!("Service error: {}", err);
                if let Some(code) = meta.headers().get("x-amz-error-code") {
                    msg.push_str(&format!(" (code: {})", code));
                }
                msg.push_str(&format!(" (status: {})", meta.status().as_u16()));
                msg
            }
            aws_sdk_s3::error::SdkError::ConstructionFailure(err) => {
                format!("Request construction failed: {:?}", err)
            }
            aws_sdk_s3::error::SdkError::TimeoutError(_) => "Request timeout".to_string(),
            aws_sdk_s3::error::SdkError::DispatchFailure(err) => {
                format!("Network dispatch error: {:?}", err)
            }
            aws_sdk_s3::error::SdkError::ResponseError(err) => {
                format!("Response error: {:?}", err)
            }
            _ => error.to_string(),
        }
    }

    /// Map an SDK error onto the cs-core taxonomy
    fn map_sdk_error<E: std::fmt::Display>(
        error: &aws_sdk_s3::error::SdkError<E>,
        what: &str,
    ) -> Error {
        classify(&Self::format_sdk_error(error), what)
    }

    /// Stream a local file into `dest`
    pub async fn put_file(&self, dest: &RemotePath, local: &Path) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| Error::General(format!("read {}: {e}", local.display())))?;
        let content_type = mime_guess::from_path(local)
            .first_or_octet_stream()
            .to_string();

        self.inner
            .put_object()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &dest.to_string()))?;

        Ok(())
    }

    /// Stream `src` into a local file, truncating it first
    ///
    /// Returns the number of bytes written.
    pub async fn get_to_file(&self, src: &RemotePath, local: &Path) -> Result<u64> {
        self.get_range_to_file(src, local, 0).await
    }

    /// Append `src` from byte `offset` onward to a local file
    ///
    /// With `offset == 0` the file is truncated. If the server ignores the
    /// range and sends the whole object, the file is rewritten from the
    /// start. Returns the number of bytes written by this call.
    pub async fn get_range_to_file(
        &self,
        src: &RemotePath,
        local: &Path,
        offset: u64,
    ) -> Result<u64> {
        let mut request = self.inner.get_object().bucket(&src.bucket).key(&src.key);
        if offset > 0 {
            request = request.range(range_from(offset));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &src.to_string()))?;

        let resumed = offset > 0 && response.content_range().is_some();
        let mut file = if resumed {
            tokio::fs::OpenOptions::new().append(true).open(local).await?
        } else {
            tokio::fs::File::create(local).await?
        };

        let mut body = response.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| Error::Network(format!("read body of {src}: {e}")))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }

    pub async fn head_object(&self, src: &RemotePath) -> Result<ObjectHead> {
        let response = self
            .inner
            .head_object()
            .bucket(&src.bucket)
            .key(&src.key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &src.to_string()))?;

        Ok(ObjectHead {
            size: response.content_length().unwrap_or(0).max(0) as u64,
            etag: response.e_tag().map(|t| t.trim_matches('"').to_string()),
        })
    }

    /// Start a multipart upload and return its id
    pub async fn create_multipart_upload(&self, dest: &RemotePath, local: &Path) -> Result<String> {
        let content_type = mime_guess::from_path(local)
            .first_or_octet_stream()
            .to_string();
        let response = self
            .inner
            .create_multipart_upload()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &dest.to_string()))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| Error::General(format!("no upload id returned for {dest}")))
    }

    /// Upload one slice of `local` and return the part's ETag
    pub async fn upload_part(
        &self,
        dest: &RemotePath,
        upload_id: &str,
        local: &Path,
        part: PartRange,
    ) -> Result<String> {
        let mut file = tokio::fs::File::open(local).await?;
        file.seek(std::io::SeekFrom::Start(part.offset)).await?;
        let mut buf = vec![0u8; part.len as usize];
        file.read_exact(&mut buf).await?;

        let response = self
            .inner
            .upload_part()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .upload_id(upload_id)
            .part_number(part.number)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &format!("{dest} part {}", part.number)))?;

        response
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| Error::General(format!("no ETag for {dest} part {}", part.number)))
    }

    pub async fn complete_multipart_upload(
        &self,
        dest: &RemotePath,
        upload_id: &str,
        parts: &[CompletedPartState],
    ) -> Result<()> {
        let parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.inner
            .complete_multipart_upload()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &dest.to_string()))?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, dest: &RemotePath, upload_id: &str) -> Result<()> {
        self.inner
            .abort_multipart_upload()
            .bucket(&dest.bucket)
            .key(&dest.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &dest.to_string()))?;
        Ok(())
    }

    /// Server-side copy within one endpoint
    pub async fn copy_object(&self, src: &RemotePath, dst: &RemotePath) -> Result<()> {
        let copy_source = copy_source(&src.bucket, &src.key);

        self.inner
            .copy_object()
            .copy_source(&copy_source)
            .bucket(&dst.bucket)
            .key(&dst.key)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &src.to_string()))?;

        Ok(())
    }
}

/// `x-amz-copy-source` value: bucket and key with each key segment URL-encoded
fn copy_source(bucket: &str, key: &str) -> String {
    let key = key
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    format!("{bucket}/{key}")
}

fn range_from(offset: u64) -> String {
    format!("bytes={offset}-")
}

/// Classify a formatted SDK error message
fn classify(message: &str, what: &str) -> Error {
    const AUTH: &[&str] = &[
        "AccessDenied",
        "InvalidAccessKeyId",
        "SignatureDoesNotMatch",
        "status: 403",
    ];
    const NOT_FOUND: &[&str] = &[
        "NoSuchKey",
        "NoSuchBucket",
        "NoSuchUpload",
        "NotFound",
        "status: 404",
    ];

    if AUTH.iter().any(|needle| message.contains(needle)) {
        Error::Auth(format!("{what}: {message}"))
    } else if NOT_FOUND.iter().any(|needle| message.contains(needle)) {
        Error::NotFound(what.to_string())
    } else {
        Error::Network(message.to_string())
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_objects(&self, path: &RemotePath, options: ListOptions) -> Result<ListResult> {
        let mut request = self.inner.list_objects_v2().bucket(&path.bucket);

        if !path.key.is_empty() {
            request = request.prefix(&path.key);
        }

        // Set delimiter (for non-recursive listing)
        if !options.recursive {
            request = request.delimiter("/");
        }

        if let Some(max) = options.max_keys {
            request = request.max_keys(max);
        }

        if let Some(token) = &options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await.map_err(|e| {
            Self::map_sdk_error(&e, &format!("bucket {}", path.bucket))
        })?;

        let mut items = Vec::new();

        // Add common prefixes (directories)
        for prefix in response.common_prefixes() {
            if let Some(p) = prefix.prefix() {
                items.push(ObjectInfo::dir(p));
            }
        }

        for object in response.contents() {
            let key = object.key().unwrap_or_default().to_string();
            let size = object.size().unwrap_or(0);
            let mut info = ObjectInfo::file(&key, size);

            if let Some(modified) = object.last_modified() {
                info.last_modified = jiff::Timestamp::from_second(modified.secs()).ok();
            }

            if let Some(etag) = object.e_tag() {
                info.etag = Some(etag.trim_matches('"').to_string());
            }

            items.push(info);
        }

        Ok(ListResult {
            items,
            truncated: response.is_truncated().unwrap_or(false),
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
        })
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        match self.inner.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => match Self::map_sdk_error(&e, bucket) {
                Error::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn delete_objects(&self, bucket: &str, keys: Vec<String>) -> Result<DeleteObjectsResult> {
        if keys.is_empty() {
            return Ok(DeleteObjectsResult::default());
        }

        let objects = keys
            .iter()
            .map(|k| ObjectIdentifier::builder().key(k).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::General(e.to_string()))?;

        // Quiet mode: only failures are listed in the response
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| Error::General(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(&e, &format!("bucket {bucket}")))?;

        let failed: Vec<(String, String)> = response
            .errors()
            .iter()
            .filter_map(|e| {
                let key = e.key()?.to_string();
                let message = match (e.code(), e.message()) {
                    (Some(code), Some(msg)) => format!("{code}: {msg}"),
                    (Some(code), None) => code.to_string(),
                    (None, Some(msg)) => msg.to_string(),
                    (None, None) => "delete failed".to_string(),
                };
                Some((key, message))
            })
            .collect();

        if !failed.is_empty() {
            tracing::warn!(bucket, failed = failed.len(), "Failed to delete some objects");
        }

        let deleted = keys
            .into_iter()
            .filter(|k| !failed.iter().any(|(f, _)| f == k))
            .collect();

        Ok(DeleteObjectsResult { deleted, failed })
    }
}
