//! S3-compatible remote bucket object store: multipart upload, paginated
//! listing, and prefix-scoped keys.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::sync::Semaphore;

use crate::config::S3Config;
use crate::error::{Error, Result};

use super::{validate_key, ObjectStore};

const MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;
const PART_SIZE: usize = 8 * 1024 * 1024;
const MAX_CONCURRENT_PARTS: usize = 4;
const DELETE_TIMEOUT: Duration = Duration::from_secs(30);
const LIST_PAGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RemoteObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl RemoteObjectStore {
    pub async fn new(cfg: &S3Config) -> Result<Self> {
        if cfg.bucket.is_empty() {
            return Err(Error::Config("s3.bucket must be set for a remote store".into()));
        }
        let region = aws_sdk_s3::config::Region::new(cfg.region.clone());
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);
        if !cfg.endpoint.is_empty() {
            loader = loader.endpoint_url(cfg.endpoint.clone());
        }
        let shared_config = loader.load().await;
        let client = Client::new(&shared_config);
        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn put_single(&self, full_key: &str, bytes: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(full_key)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| Error::Store(format!("put_object {full_key}: {e}")))?;
        Ok(())
    }

    async fn put_multipart(&self, full_key: &str, bytes: Vec<u8>) -> Result<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(full_key)
            .send()
            .await
            .map_err(|e| Error::Store(format!("create_multipart_upload {full_key}: {e}")))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| Error::Store("missing upload id".into()))?
            .to_string();

        let bytes = Arc::new(bytes);
        let chunks: Vec<(i32, usize, usize)> = bytes
            .chunks(PART_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                let start = i * PART_SIZE;
                (i as i32 + 1, start, start + chunk.len())
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_PARTS));
        let mut tasks = Vec::new();
        for (part_number, start, end) in chunks {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = full_key.to_string();
            let upload_id = upload_id.clone();
            let bytes = Arc::clone(&bytes);
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let body = ByteStream::from(bytes[start..end].to_vec());
                let resp = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .part_number(part_number)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::Store(format!("upload_part {part_number}: {e}")))?;
                let etag = resp
                    .e_tag()
                    .ok_or_else(|| Error::Store("missing etag on part".into()))?
                    .to_string();
                Ok::<CompletedPart, Error>(
                    CompletedPart::builder()
                        .part_number(part_number)
                        .e_tag(etag)
                        .build(),
                )
            }));
        }

        let mut parts = Vec::with_capacity(tasks.len());
        for task in tasks {
            let part = task
                .await
                .map_err(|e| Error::Store(format!("upload task join error: {e}")))??;
            parts.push(part);
        }
        parts.sort_by_key(|p| p.part_number());

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(full_key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| Error::Store(format!("complete_multipart_upload {full_key}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RemoteObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        if bytes.len() > MULTIPART_THRESHOLD {
            self.put_multipart(&full_key, bytes).await
        } else {
            self.put_single(&full_key, bytes).await
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    Error::NotFound(key.to_string())
                } else {
                    Error::Store(format!("get_object {full_key}: {e}"))
                }
            })?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::Store(format!("read body {full_key}: {e}")))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let full_key = self.full_key(key);
        tokio::time::timeout(
            DELETE_TIMEOUT,
            self.client.delete_object().bucket(&self.bucket).key(&full_key).send(),
        )
        .await
        .map_err(|_| Error::Store(format!("delete_object {full_key} timed out")))?
        .map_err(|e| Error::Store(format!("delete_object {full_key}: {e}")))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }
            let resp = tokio::time::timeout(LIST_PAGE_TIMEOUT, request.send())
                .await
                .map_err(|_| Error::Store("list_objects_v2 page timed out".into()))?
                .map_err(|e| Error::Store(format!("list_objects_v2: {e}")))?;
            for object in resp.contents() {
                if let Some(full_key) = object.key() {
                    // Keys that do not carry the configured prefix, or that
                    // are the prefix itself, are not ours to report.
                    if full_key == self.prefix || !full_key.starts_with(self.prefix.as_str()) {
                        continue;
                    }
                    let stripped = full_key[self.prefix.len()..].replace('\\', "/");
                    if stripped.is_empty() || validate_key(&stripped).is_err() {
                        continue;
                    }
                    keys.push(stripped);
                }
            }
            if resp.is_truncated().unwrap_or(false) {
                continuation_token = resp.next_continuation_token().map(|s| s.to_string());
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        keys.sort();
        Ok(keys)
    }
}
