//! Storage abstraction trait
//!
//! This module defines the Storage trait that both storage backends implement,
//! the error taxonomy shared by them, and the outcome of an availability probe.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The key does not exist. An expected, user-facing negative result.
    #[error("File not found: {0}")]
    NotFound(String),

    /// A specific backend could not complete an operation (connectivity,
    /// permissions, I/O).
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No backend could be selected at all.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Classify an I/O failure on `key`: a missing file is `NotFound`,
    /// everything else means the backend could not serve the request.
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::BackendUnavailable(format!("{}: {}", key, err)),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of content chunks returned by [`Storage::retrieve`].
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Where a stored object was written.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoredLocation {
    Bucket {
        bucket: String,
        key: String,
        url: String,
    },
    Filesystem {
        path: PathBuf,
        key: String,
        url: String,
    },
}

impl StoredLocation {
    pub fn key(&self) -> &str {
        match self {
            StoredLocation::Bucket { key, .. } | StoredLocation::Filesystem { key, .. } => key,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            StoredLocation::Bucket { url, .. } | StoredLocation::Filesystem { url, .. } => url,
        }
    }
}

/// Content returned by a successful retrieval.
pub struct StoredObject {
    pub key: String,
    pub size: Option<u64>,
    pub stream: ByteStream,
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("key", &self.key)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Result of an availability probe.
///
/// Probes never fail: every problem is folded into one of these outcomes, and
/// everything other than `Available` means "do not use this backend now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Available,
    /// The backend answered but is not usable (e.g. root is not writable).
    Unavailable(String),
    /// The probe itself errored (network, auth, timeout).
    Failed(String),
}

impl ProbeOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, ProbeOutcome::Available)
    }

    /// Human-readable reason for a negative outcome.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Available => None,
            ProbeOutcome::Unavailable(reason) | ProbeOutcome::Failed(reason) => Some(reason),
        }
    }
}

/// Storage abstraction trait
///
/// Both backends (S3, local filesystem) implement this trait. Keys are relative,
/// path-like strings (`docs/2024/report.pdf`); see the `keys` module for the
/// rules both backends enforce.
///
/// Implementations must never mutate backend-selection state; they only report
/// outcomes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` under `key`, replacing any existing object.
    async fn store(&self, key: &str, content_type: &str, data: Bytes)
        -> StorageResult<StoredLocation>;

    /// Open `key` for reading. Fails with `NotFound` when the key is absent.
    async fn retrieve(&self, key: &str) -> StorageResult<StoredObject>;

    /// Remove `key`. Fails with `NotFound` when the key is absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if a file exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Side-effect-free check of whether this backend can currently serve requests.
    async fn probe(&self) -> ProbeOutcome;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
