//! Backend construction.
//!
//! The selector never builds backends itself; it asks a [`BackendFactory`] for the
//! current settings and for the two backend variants. Production code uses
//! [`DefaultBackendFactory`], tests substitute fakes.

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
#[cfg(any(not(feature = "storage-s3"), not(feature = "storage-local")))]
use crate::StorageError;
use crate::{Storage, StorageResult};
use async_trait::async_trait;
use std::sync::Arc;
use stowage_core::{StorageSettings, StorageSettingsSource};

/// Builds storage backends for one selection run.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Read the settings for this run. Called once per run, so configuration
    /// changes take effect on the next reinitialize.
    fn settings(&self) -> Result<StorageSettings, anyhow::Error>;

    /// Build the remote object backend. Must not contact the remote service.
    async fn build_remote(&self, settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>>;

    /// Build the local filesystem backend.
    async fn build_local(&self, settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>>;
}

/// Factory that builds the real S3 and local backends.
pub struct DefaultBackendFactory {
    source: Arc<dyn StorageSettingsSource>,
}

impl DefaultBackendFactory {
    pub fn new(source: Arc<dyn StorageSettingsSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl BackendFactory for DefaultBackendFactory {
    fn settings(&self) -> Result<StorageSettings, anyhow::Error> {
        self.source.storage_settings()
    }

    #[cfg(feature = "storage-s3")]
    async fn build_remote(&self, settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        let storage = S3Storage::new(&settings.remote, settings.probe_timeout).await?;
        Ok(Arc::new(storage))
    }

    #[cfg(not(feature = "storage-s3"))]
    async fn build_remote(&self, _settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        ))
    }

    #[cfg(feature = "storage-local")]
    async fn build_local(&self, settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        let storage = LocalStorage::new(
            settings.local.root.clone(),
            settings.local.public_base_url.clone(),
        )
        .await?;
        Ok(Arc::new(storage))
    }

    #[cfg(not(feature = "storage-local"))]
    async fn build_local(&self, _settings: &StorageSettings) -> StorageResult<Arc<dyn Storage>> {
        Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        ))
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::StorageBackend;

    #[tokio::test]
    async fn test_default_factory_builds_local() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StorageSettings::local_only(dir.path().join("root"), "http://localhost:3000");
        let factory = DefaultBackendFactory::new(Arc::new(settings.clone()));

        let loaded = factory.settings().unwrap();
        assert!(!loaded.remote.enabled);

        let local = factory.build_local(&loaded).await.unwrap();
        assert_eq!(local.backend_type(), StorageBackend::Local);
        assert!(dir.path().join("root").is_dir());
    }

    #[tokio::test]
    async fn test_default_factory_surfaces_invalid_settings() {
        let mut settings = StorageSettings::local_only("./storage", "http://localhost:3000");
        settings.remote.enabled = true;
        let factory = DefaultBackendFactory::new(Arc::new(settings));

        assert!(factory.settings().is_err());
    }
}
