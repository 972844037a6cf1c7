// Blob store adapter: S3/MinIO-compatible object storage for large snapshots.
//
// No crate in the rest of the workspace speaks object storage, so this
// trait is a full get/put/delete surface since the snapshot store needs
// to move payloads in both directions, not just upload them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over the object-storage backend so the snapshot store
/// can be tested without a live MinIO/S3 endpoint.
pub trait BlobStore: Send + Sync {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BlobFuture<'a, ()>;
    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Option<Vec<u8>>>;
    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()>;
}

/// Document-scoped blob key, per the relay's simplified single-current
/// snapshot model (no snapshot generation segment — there is always
/// exactly one physical form of the current snapshot).
pub fn snapshot_blob_key(document_id: Uuid) -> String {
    format!("docs/{document_id}.bin")
}

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn from_env() -> Result<Self> {
        let endpoint = std::env::var("SCRIPTUM_RELAY_MINIO_ENDPOINT")
            .context("SCRIPTUM_RELAY_MINIO_ENDPOINT must be set to initialize the blob store")?;
        let access_key = std::env::var("SCRIPTUM_RELAY_MINIO_ACCESS_KEY")
            .context("SCRIPTUM_RELAY_MINIO_ACCESS_KEY must be set")?;
        let secret_key = std::env::var("SCRIPTUM_RELAY_MINIO_SECRET_KEY")
            .context("SCRIPTUM_RELAY_MINIO_SECRET_KEY must be set")?;
        let bucket =
            std::env::var("SCRIPTUM_RELAY_MINIO_BUCKET").unwrap_or_else(|_| "crdt-snapshots".into());

        let credentials = Credentials::new(access_key, secret_key, None, None, "scriptum-relay");
        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(endpoint)
            .region(Region::new("us-east-1"))
            .credentials_provider(credentials)
            .force_path_style(true)
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();

        Ok(Self { client: Client::from_conf(config), bucket })
    }

    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self { client, bucket: bucket.into() }
    }
}

impl BlobStore for S3BlobStore {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(
            async move {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(ByteStream::from(payload.to_vec()))
                    .send()
                    .await
                    .with_context(|| format!("failed to put blob at key `{key}`"))?;
                Ok(())
            }
            .instrument(info_span!("relay.blob.put", key = %key, bytes = payload.len())),
        )
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Option<Vec<u8>>> {
        Box::pin(
            async move {
                let response = self.client.get_object().bucket(&self.bucket).key(key).send().await;
                match response {
                    Ok(output) => {
                        let bytes = output
                            .body
                            .collect()
                            .await
                            .with_context(|| format!("failed to read blob body for key `{key}`"))?
                            .into_bytes();
                        Ok(Some(bytes.to_vec()))
                    }
                    Err(error) if is_not_found(&error) => Ok(None),
                    Err(error) => {
                        Err(error).with_context(|| format!("failed to get blob at key `{key}`"))
                    }
                }
            }
            .instrument(info_span!("relay.blob.get", key = %key)),
        )
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(
            async move {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await
                    .with_context(|| format!("failed to delete blob at key `{key}`"))?;
                Ok(())
            }
            .instrument(info_span!("relay.blob.delete", key = %key)),
        )
    }
}

fn is_not_found(
    error: &aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>,
) -> bool {
    matches!(
        error,
        aws_sdk_s3::error::SdkError::ServiceError(service_error)
            if service_error.err().is_no_such_key()
    )
}

/// In-memory blob store used by tests and by the snapshot store's own
/// unit tests — avoids spinning up MinIO for inline/blob transition tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl BlobStore for MemoryBlobStore {
    fn put<'a>(&'a self, key: &'a str, payload: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.objects.write().await.insert(key.to_string(), payload.to_vec());
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { Ok(self.objects.read().await.get(key).cloned()) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            self.objects.write().await.remove(key);
            Ok(())
        })
    }
}
