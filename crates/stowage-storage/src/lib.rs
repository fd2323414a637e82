//! Stowage Storage Library
//!
//! This crate provides the storage abstraction, its S3 and local filesystem
//! implementations, and the [`BackendSelector`] that decides which of them is
//! active.
//!
//! # Storage key format
//!
//! Keys are relative, `/`-separated paths such as `docs/2024/report.pdf`. Both
//! backends validate keys through the `keys` module: a leading `/` is stripped,
//! and empty keys or keys with `.`/`..`/empty segments are rejected.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod selector;
pub mod traits;

// Re-export commonly used types
pub use factory::{BackendFactory, DefaultBackendFactory};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use selector::{ActiveBackend, BackendSelector, SelectorState, SelectorStatus};
pub use stowage_core::{RemoteSettings, StorageBackend};
pub use traits::{
    ByteStream, ProbeOutcome, Storage, StorageError, StorageResult, StoredLocation, StoredObject,
};
