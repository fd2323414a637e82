//! Stowage Core Library
//!
//! Configuration, storage settings and the unified application error type shared
//! by the storage and API crates.

pub mod config;
pub mod error;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BaseConfig, Config, EnvStorageSettings, FileServiceConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::{
    LocalSettings, RemoteSettings, StorageBackend, StorageSettings, StorageSettingsSource,
};
