use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{debug, info};

use super::{BlobStore, StorageError};

/// S3 / MinIO backed blob store.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 upload of {key} failed: {e}")))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                debug!("s3://{}/{} does not exist", self.bucket, key);
                return Ok(None);
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "S3 download of {key} failed: {e}"
                )))
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 body read of {key} failed: {e}")))?;

        Ok(Some(body.into_bytes()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        // DeleteObject succeeds for missing keys, so check existence first.
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(false)
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "S3 head of {key} failed: {e}"
                )))
            }
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("S3 delete of {key} failed: {e}")))?;

        info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::Backend(format!("S3 list of {prefix} failed: {e}")))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Listed {} keys under s3://{}/{}", keys.len(), self.bucket, prefix);
        Ok(keys)
    }
}
