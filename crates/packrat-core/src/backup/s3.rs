//! S3 object store
//!
//! Works against AWS S3 and S3-compatible services (MinIO, Spaces) via
//! an optional custom endpoint. Large archives go up as sequential
//! multipart uploads; each part gets a few retry attempts with
//! exponential backoff before the whole session is aborted.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::{ObjectStore, RemoteObject};
use crate::error::{Error, Result};
use crate::models::S3Settings;

/// Files above this size upload in parts
const MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const MULTIPART_PART_BYTES: u64 = 10 * 1024 * 1024;
const UPLOAD_MAX_ATTEMPTS: u32 = 3;
/// Cap on any single S3 call so a hung remote can't pin a worker
const OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// S3-backed archive store. Cheap to clone.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client for the configured target
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &settings.access_key,
                &settings.secret_key,
                None, // session_token
                None, // expiry
                "Static",
            ));
        if let Some(endpoint) = &settings.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        // MinIO and friends want path-style addressing
        let client = if settings.endpoint.is_some() {
            let config = s3::config::Builder::from(&sdk_config)
                .force_path_style(true)
                .build();
            s3::Client::from_conf(config)
        } else {
            s3::Client::new(&sdk_config)
        };

        Self {
            client,
            bucket: settings.bucket.clone(),
        }
    }

    async fn upload_simple(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            Error::Storage(format!("cannot read {}: {}", local_path.display(), e))
        })?;

        send_with_timeout(
            "put_object",
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send(),
        )
        .await
        .map_err(Error::Storage)?;

        Ok(())
    }

    async fn upload_multipart(&self, local_path: &Path, key: &str, size: u64) -> Result<()> {
        info!(
            "starting multipart upload: {} ({} bytes, {} parts)",
            key,
            size,
            size.div_ceil(MULTIPART_PART_BYTES)
        );

        let multipart = send_with_timeout(
            "create_multipart_upload",
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await
        .map_err(Error::Storage)?;

        let upload_id = multipart
            .upload_id()
            .ok_or_else(|| Error::Storage("no upload id returned".to_string()))?
            .to_string();

        let file = tokio::fs::File::open(local_path).await.map_err(|e| {
            Error::Storage(format!("cannot open {}: {}", local_path.display(), e))
        })?;
        let mut reader = tokio::io::BufReader::new(file);
        let mut part_number = 1i32;
        let mut completed_parts = Vec::new();

        loop {
            let buffer = read_part(&mut reader)
                .await
                .map_err(|e| Error::Storage(format!("read of {} failed: {}", key, e)))?;
            if buffer.is_empty() {
                break;
            }

            debug!("uploading part {} ({} bytes)", part_number, buffer.len());

            let mut attempt = 0;
            let part = loop {
                attempt += 1;
                let result = send_with_timeout(
                    "upload_part",
                    self.client
                        .upload_part()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .part_number(part_number)
                        .body(ByteStream::from(buffer.clone()))
                        .send(),
                )
                .await;

                match result {
                    Ok(part) => break part,
                    Err(message) => {
                        if attempt >= UPLOAD_MAX_ATTEMPTS {
                            self.abort_multipart(key, &upload_id).await;
                            return Err(Error::Storage(format!(
                                "part {} failed after {} attempts: {}",
                                part_number, UPLOAD_MAX_ATTEMPTS, message
                            )));
                        }
                        let backoff_ms = 1000 * (1u64 << (attempt - 1));
                        warn!(
                            "part {} upload failed (attempt {}/{}), retrying in {}ms: {}",
                            part_number, attempt, UPLOAD_MAX_ATTEMPTS, backoff_ms, message
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            };

            completed_parts.push(
                s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part.e_tag().unwrap_or(""))
                    .build(),
            );
            part_number += 1;
        }

        let completed = s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        send_with_timeout(
            "complete_multipart_upload",
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .multipart_upload(completed)
                .send(),
        )
        .await
        .map_err(Error::Storage)?;

        info!("multipart upload completed: {}", key);
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let result = send_with_timeout(
            "abort_multipart_upload",
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send(),
        )
        .await;

        if let Err(message) = result {
            warn!("failed to abort multipart upload for {}: {}", key, message);
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<String> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| Error::Storage(format!("cannot stat {}: {}", local_path.display(), e)))?
            .len();

        if uses_multipart(size) {
            self.upload_multipart(local_path, key, size).await?;
        } else {
            self.upload_simple(local_path, key).await?;
        }
        Ok(key.to_string())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        send_with_timeout(
            "delete_object",
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send(),
        )
        .await
        .map_err(Error::Storage)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = send_with_timeout("list_objects_v2", request.send())
                .await
                .map_err(Error::Storage)?;

            for object in response.contents() {
                let key = match object.key() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                let last_modified = object
                    .last_modified()
                    .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_else(Utc::now);

                objects.push(RemoteObject {
                    key,
                    last_modified,
                    size: object.size().unwrap_or(0),
                });
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated() == Some(true) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(objects)
    }

    /// Reachability and auth check with no bucket side effects
    async fn test_connection(&self) -> Result<()> {
        send_with_timeout(
            "head_bucket",
            self.client.head_bucket().bucket(&self.bucket).send(),
        )
        .await
        .map_err(Error::Connection)?;
        Ok(())
    }
}

fn uses_multipart(size: u64) -> bool {
    size > MULTIPART_THRESHOLD_BYTES
}

/// Read up to one part, filling the buffer across short reads
async fn read_part(reader: &mut (impl AsyncReadExt + Unpin)) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; MULTIPART_PART_BYTES as usize];
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

async fn send_with_timeout<T, E>(
    op: &str,
    fut: impl std::future::Future<Output = std::result::Result<T, E>>,
) -> std::result::Result<T, String>
where
    E: std::error::Error,
{
    match tokio::time::timeout(OPERATION_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{} failed: {}", op, DisplayErrorContext(e))),
        Err(_) => Err(format!(
            "{} timed out after {}s",
            op,
            OPERATION_TIMEOUT.as_secs()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multipart_threshold() {
        assert!(!uses_multipart(0));
        assert!(!uses_multipart(MULTIPART_THRESHOLD_BYTES));
        assert!(uses_multipart(MULTIPART_THRESHOLD_BYTES + 1));
    }

    #[tokio::test]
    async fn test_read_part_fills_across_short_reads() {
        let data = vec![7u8; MULTIPART_PART_BYTES as usize + 100];
        let mut reader = data.as_slice();

        let part = read_part(&mut reader).await.unwrap();
        assert_eq!(part.len(), MULTIPART_PART_BYTES as usize);

        let rest = read_part(&mut reader).await.unwrap();
        assert_eq!(rest.len(), 100);

        let end = read_part(&mut reader).await.unwrap();
        assert!(end.is_empty());
    }
}
