use crate::keys::normalize_key;
use crate::traits::{ProbeOutcome, Storage, StorageError, StorageResult, StoredLocation, StoredObject};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/stowage")
    /// * `base_url` - Base URL the service is reachable under (e.g., "http://localhost:3000");
    ///   files are served from `{base_url}/files/{key}`
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
        })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// The deepest part of the path that already exists is resolved and must
    /// stay under the base directory, so symlinks cannot redirect reads or
    /// writes (including writes that would create new files or directories).
    fn key_to_path(&self, storage_key: &str) -> StorageResult<(String, PathBuf)> {
        let key = normalize_key(storage_key)?;
        let path = self.base_path.join(&key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Failed to canonicalize base path {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        for ancestor in path.ancestors() {
            match ancestor.canonicalize() {
                Ok(resolved) if resolved.starts_with(&base_canonical) => return Ok((key, path)),
                Ok(_) => return Err(outside_root()),
                // Exists but cannot be resolved, e.g. a dangling symlink.
                Err(_) if ancestor.symlink_metadata().is_ok() => return Err(outside_root()),
                Err(_) => continue,
            }
        }

        Err(outside_root())
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::BackendUnavailable(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Metadata-only check that the root is a directory we may write to.
    async fn check_writable(&self) -> ProbeOutcome {
        let meta = match fs::metadata(&self.base_path).await {
            Ok(meta) => meta,
            Err(e) => {
                return ProbeOutcome::Unavailable(format!(
                    "Storage root {} is not accessible: {}",
                    self.base_path.display(),
                    e
                ))
            }
        };

        if !meta.is_dir() {
            return ProbeOutcome::Unavailable(format!(
                "Storage root {} is not a directory",
                self.base_path.display()
            ));
        }

        if meta.permissions().readonly() {
            return ProbeOutcome::Unavailable(format!(
                "Storage root {} is read-only",
                self.base_path.display()
            ));
        }

        ProbeOutcome::Available
    }
}

fn outside_root() -> StorageError {
    StorageError::InvalidKey("Storage key resolves outside storage directory".to_string())
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(
        &self,
        key: &str,
        _content_type: &str,
        data: Bytes,
    ) -> StorageResult<StoredLocation> {
        let (key, path) = self.key_to_path(key)?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Failed to create file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Failed to write file {}: {}",
                path.display(),
                e
            ))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::BackendUnavailable(format!(
                "Failed to sync file {}: {}",
                path.display(),
                e
            ))
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage store successful"
        );

        Ok(StoredLocation::Filesystem { path, key, url })
    }

    async fn retrieve(&self, key: &str) -> StorageResult<StoredObject> {
        let (key, path) = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        let meta = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(&key, e))?;
        if !meta.is_file() {
            return Err(StorageError::NotFound(key));
        }

        let file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(&key, e))?;

        let path_display = path.display().to_string();
        let log_key = key.clone();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |item| {
            item.map_err(|e| {
                tracing::error!(
                    path = %path_display,
                    key = %log_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream read error"
                );
                StorageError::BackendUnavailable(format!("Failed to read chunk: {}", e))
            })
        });

        tracing::debug!(
            path = %path.display(),
            key = %key,
            size_bytes = meta.len(),
            "Local storage retrieve opened"
        );

        Ok(StoredObject {
            key,
            size: Some(meta.len()),
            stream: Box::pin(stream),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let (key, path) = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(StorageError::NotFound(key)),
            Err(e) => return Err(StorageError::from_io(&key, e)),
        }

        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io(&key, e))?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let (key, path) = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(&key, e)),
        }
    }

    async fn probe(&self) -> ProbeOutcome {
        self.check_writable().await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
