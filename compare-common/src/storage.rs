//! Gateway to the object store holding source files and derived artifacts.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3SdkClient;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::StorageConfig;

/// Lifetime of every presigned URL handed to downstream consumers.
pub const PRESIGNED_URL_TTL: Duration = Duration::from_secs(120);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("failed to fetch {url}: {reason}")]
    Transfer { url: String, reason: String },
    #[error("bucket {bucket} is unavailable: {reason}")]
    Unavailable { bucket: String, reason: String },
    #[error("storage operation failed: {0}")]
    Operation(String),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read a whole object through a (presigned) URL.
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError>;

    /// Write `body` under `key`. The bucket must already exist.
    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError>;

    /// Mint a read URL valid for `ttl`. The object must have been uploaded.
    async fn presign(&self, bucket: &str, key: &str, ttl: Duration)
        -> Result<String, StorageError>;
}

/// S3-compatible store (MinIO in most deployments).
pub struct S3ArtifactStore {
    client: AwsS3SdkClient,
    http: reqwest::Client,
}

impl S3ArtifactStore {
    pub fn new(client: AwsS3SdkClient, http: reqwest::Client) -> Self {
        Self { client, http }
    }

    pub async fn from_config(config: &StorageConfig) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "environment",
        );
        let endpoint = config.endpoint_url();
        info!(%endpoint, bucket = config.bucket.as_str(), "configuring object store");

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(config.force_path_style)
            .build();

        Self::new(AwsS3SdkClient::from_conf(s3_config), reqwest::Client::new())
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        let transfer_error = |reason: String| StorageError::Transfer {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| transfer_error(e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| transfer_error(format!("failed to read body: {e}")))
    }

    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| StorageError::Unavailable {
                bucket: bucket.to_owned(),
                reason: e.into_service_error().to_string(),
            })?;

        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("text/plain")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::Operation(format!(
                    "failed to upload s3://{bucket}/{key}: {}",
                    e.into_service_error()
                ))
            })?;

        debug!(bucket, key, size, "uploaded artifact");
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::Operation(format!(
                    "cannot presign missing object s3://{bucket}/{key}: {}",
                    e.into_service_error()
                ))
            })?;

        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Operation(format!("invalid presign ttl: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| {
                StorageError::Operation(format!(
                    "failed to presign s3://{bucket}/{key}: {}",
                    e.into_service_error()
                ))
            })?;

        Ok(request.uri().to_string())
    }
}

/// In-memory store for tests: serves registered files and keeps uploads in a map.
#[derive(Clone, Default)]
pub struct MockArtifactStore {
    files: HashMap<String, Bytes>,
    buckets: Vec<String>,
    failing_keys: Vec<String>,
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    uploads: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.buckets.push(bucket.to_owned());
        self
    }

    /// Serve `body` when `url` is fetched.
    pub fn with_file(mut self, url: &str, body: impl Into<Bytes>) -> Self {
        self.files.insert(url.to_owned(), body.into());
        self
    }

    /// Reject uploads of `key` as if the store were unreachable.
    pub fn failing_upload(mut self, key: &str) -> Self {
        self.failing_keys.push(key.to_owned());
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().map(|(_, key)| key.clone()).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::Transfer {
                url: url.to_owned(),
                reason: "404 Not Found".to_owned(),
            })
    }

    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if !self.buckets.iter().any(|b| b == bucket) {
            return Err(StorageError::Unavailable {
                bucket: bucket.to_owned(),
                reason: "NoSuchBucket".to_owned(),
            });
        }
        if self.failing_keys.iter().any(|k| k == key) {
            return Err(StorageError::Operation(format!(
                "failed to upload s3://{bucket}/{key}: connection reset"
            )));
        }

        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Operation("poisoned mock store".to_owned()))?;
        objects.insert((bucket.to_owned(), key.to_owned()), body);
        Ok(())
    }

    async fn presign(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        if self.object(bucket, key).is_none() {
            return Err(StorageError::Operation(format!(
                "cannot presign missing object s3://{bucket}/{key}"
            )));
        }
        Ok(format!(
            "http://mock-store/{bucket}/{key}?X-Amz-Expires={}",
            ttl.as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;

    use super::*;

    fn unused_s3_client() -> AwsS3SdkClient {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        AwsS3SdkClient::from_conf(config)
    }

    fn store_for(server: &MockServer) -> S3ArtifactStore {
        let credentials =
            aws_sdk_s3::config::Credentials::new("minio", "minio123", None, None, "test");
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(server.base_url())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        S3ArtifactStore::new(AwsS3SdkClient::from_conf(config), reqwest::Client::new())
    }

    #[tokio::test]
    async fn upload_checks_bucket_before_put() {
        let server = MockServer::start();
        let head_bucket = server.mock(|when, then| {
            when.method(HEAD).path("/clean");
            then.status(200);
        });
        let put_object = server.mock(|when, then| {
            when.method(PUT).path("/clean/f1-diff.txt");
            then.status(200);
        });

        let store = store_for(&server);
        store
            .upload("clean", "f1-diff.txt", b"hello wor[-l-]d".to_vec())
            .await
            .unwrap();

        head_bucket.assert();
        put_object.assert();
    }

    #[tokio::test]
    async fn upload_to_missing_bucket_is_unavailable() {
        let server = MockServer::start();
        let head_bucket = server.mock(|when, then| {
            when.method(HEAD).path("/missing");
            then.status(404);
        });
        let put_object = server.mock(|when, then| {
            when.method(PUT).path("/missing/f1-diff.txt");
            then.status(200);
        });

        let store = store_for(&server);
        let error = store
            .upload("missing", "f1-diff.txt", b"diff".to_vec())
            .await
            .unwrap_err();

        assert!(
            matches!(&error, StorageError::Unavailable { bucket, .. } if bucket == "missing"),
            "unexpected error: {error}"
        );
        head_bucket.assert();
        put_object.assert_hits(0);
    }

    #[tokio::test]
    async fn presign_refuses_missing_object() {
        let server = MockServer::start();
        let head_object = server.mock(|when, then| {
            when.method(HEAD).path("/clean/never-uploaded.txt");
            then.status(404);
        });

        let store = store_for(&server);
        let error = store
            .presign("clean", "never-uploaded.txt", PRESIGNED_URL_TTL)
            .await
            .unwrap_err();

        head_object.assert();
        assert!(matches!(error, StorageError::Operation(_)));
    }

    #[tokio::test]
    async fn presign_existing_object() {
        let server = MockServer::start();
        let head_object = server.mock(|when, then| {
            when.method(HEAD).path("/clean/f1-diff.txt");
            then.status(200);
        });

        let store = store_for(&server);
        let url = store
            .presign("clean", "f1-diff.txt", PRESIGNED_URL_TTL)
            .await
            .unwrap();

        head_object.assert();
        assert!(url.starts_with(&server.url("/clean/f1-diff.txt")));
        assert!(url.contains("X-Amz-Expires=120"));
    }

    #[tokio::test]
    async fn fetch_reads_whole_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/bucket/source.pdf");
            then.status(200).body("hello world");
        });

        let store = S3ArtifactStore::new(unused_s3_client(), reqwest::Client::new());
        let body = store.fetch(&server.url("/bucket/source.pdf")).await.unwrap();

        mock.assert();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn fetch_fails_on_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bucket/expired.pdf");
            then.status(403).body("Request has expired");
        });

        let store = S3ArtifactStore::new(unused_s3_client(), reqwest::Client::new());
        let error = store
            .fetch(&server.url("/bucket/expired.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(error, StorageError::Transfer { .. }));
    }

    #[tokio::test]
    async fn mock_store_overwrites_same_key() {
        let store = MockArtifactStore::new().with_bucket("artifacts");

        store
            .upload("artifacts", "f1-diff.txt", b"first".to_vec())
            .await
            .unwrap();
        store
            .upload("artifacts", "f1-diff.txt", b"second".to_vec())
            .await
            .unwrap();

        assert_eq!(store.object_keys(), vec!["f1-diff.txt".to_owned()]);
        assert_eq!(
            store.object("artifacts", "f1-diff.txt"),
            Some(b"second".to_vec())
        );
    }

    #[tokio::test]
    async fn mock_store_requires_bucket_and_upload() {
        let store = MockArtifactStore::new();

        assert!(matches!(
            store.upload("missing", "key", Vec::new()).await,
            Err(StorageError::Unavailable { .. })
        ));
        assert!(matches!(
            store.presign("missing", "key", PRESIGNED_URL_TTL).await,
            Err(StorageError::Operation(_))
        ));
    }
}
