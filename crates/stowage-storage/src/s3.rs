use crate::keys::normalize_key;
use crate::traits::{ProbeOutcome, Storage, StorageError, StorageResult, StoredLocation, StoredObject};
use crate::{RemoteSettings, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use std::time::Duration;

/// Prefix listed to check bucket reachability. Nothing needs to exist under it.
const PROBE_PREFIX: &str = ".stowage-probe";

/// S3 storage implementation
#[derive(Clone, Debug)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    probe_timeout: Duration,
}

impl S3Storage {
    /// Create a new S3Storage instance from remote settings.
    ///
    /// Credentials fall back to the standard AWS environment variables when
    /// they are not set explicitly. A custom endpoint
    /// (e.g. "http://localhost:9000" for MinIO) enables S3-compatible providers.
    pub async fn new(settings: &RemoteSettings, probe_timeout: Duration) -> StorageResult<Self> {
        let bucket = settings
            .bucket
            .clone()
            .ok_or_else(|| StorageError::ConfigError("S3_BUCKET_NAME not configured".to_string()))?;
        let region = settings.region.clone().ok_or_else(|| {
            StorageError::ConfigError("S3_REGION or AWS_REGION not configured".to_string())
        })?;

        let mut builder = AmazonS3Builder::from_env()
            .with_region(region.clone())
            .with_bucket_name(bucket.clone());

        if let (Some(access_key_id), Some(secret)) = (
            settings.access_key_id.as_ref(),
            settings.secret_access_key.as_ref(),
        ) {
            builder = builder
                .with_access_key_id(access_key_id.clone())
                .with_secret_access_key(secret.clone());
        }

        if let Some(ref endpoint) = settings.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        if settings.force_path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            region,
            endpoint_url: settings.endpoint.clone(),
            probe_timeout,
        })
    }

    /// Generate public URL for S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style under the endpoint URL
    fn generate_url(&self, key: &str) -> String {
        object_url(
            self.endpoint_url.as_deref(),
            &self.bucket,
            &self.region,
            key,
        )
    }

    fn map_error(&self, key: &str, err: ObjectStoreError) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::BackendUnavailable(format!(
                "S3 bucket {}: {}",
                self.bucket, other
            )),
        }
    }
}

fn object_url(endpoint: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn store(
        &self,
        key: &str,
        _content_type: &str,
        data: Bytes,
    ) -> StorageResult<StoredLocation> {
        let key = normalize_key(key)?;
        let size = data.len() as u64;
        let location = Path::from(key.clone());

        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 store failed"
            );
            StorageError::BackendUnavailable(e.to_string())
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 store successful"
        );

        Ok(StoredLocation::Bucket {
            bucket: self.bucket.clone(),
            key,
            url,
        })
    }

    async fn retrieve(&self, key: &str) -> StorageResult<StoredObject> {
        let key = normalize_key(key)?;
        let start = std::time::Instant::now();
        let location = Path::from(key.clone());

        let result: ObjectResult<_> = self.store.get(&location).await;

        let result = result.map_err(|e| {
            let err = self.map_error(&key, e);
            if matches!(err, StorageError::BackendUnavailable(_)) {
                tracing::error!(
                    error = %err,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 retrieve failed"
                );
            }
            err
        })?;

        let size = result.meta.size as u64;
        let bucket = self.bucket.clone();
        let log_key = key.clone();

        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    bucket = %bucket,
                    key = %log_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 stream read error"
                );
                Err(StorageError::BackendUnavailable(e.to_string()))
            }
        });

        Ok(StoredObject {
            key,
            size: Some(size),
            stream: Box::pin(stream),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = normalize_key(key)?;
        let start = std::time::Instant::now();
        let location = Path::from(key.clone());

        // S3 deletes are idempotent; check first so a missing key reports NotFound.
        self.store
            .head(&location)
            .await
            .map_err(|e| self.map_error(&key, e))?;

        let result: ObjectResult<_> = self.store.delete(&location).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 delete failed"
            );
            self.map_error(&key, e)
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let key = normalize_key(key)?;
        let location = Path::from(key.clone());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.map_error(&key, e)),
        }
    }

    /// List a fixed prefix in the bucket. Only a successful listing counts:
    /// a missing bucket answers 404, which is as unusable as a network error.
    async fn probe(&self) -> ProbeOutcome {
        let prefix = Path::from(PROBE_PREFIX);
        let listing = object_store::ObjectStore::list_with_delimiter(&self.store, Some(&prefix));
        match tokio::time::timeout(self.probe_timeout, listing).await {
            Ok(Ok(_)) => ProbeOutcome::Available,
            Ok(Err(e)) => ProbeOutcome::Failed(format!("S3 bucket {}: {}", self.bucket, e)),
            Err(_) => ProbeOutcome::Failed(format!(
                "S3 probe timed out after {} ms",
                self.probe_timeout.as_millis()
            )),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
