//! Storage setup and initialization

use anyhow::{Context, Result};
use std::sync::Arc;
use stowage_core::{Config, EnvStorageSettings};
use stowage_storage::BackendSelector;

/// Build the backend selector and run the first selection so startup fails fast
/// when no backend can be selected.
///
/// The selector re-reads storage settings from the environment on every run, so a
/// later reinitialize picks up changed settings.
pub async fn setup_storage(config: &Config) -> Result<Arc<BackendSelector>> {
    tracing::info!(
        s3_enabled = config.storage().remote.enabled,
        storage_path = %config.storage().local.root.display(),
        probe_timeout_ms = config.storage().probe_timeout.as_millis() as u64,
        "Initializing storage backend selector..."
    );

    let selector = Arc::new(BackendSelector::from_settings_source(Arc::new(
        EnvStorageSettings,
    )));

    let active = selector
        .active_backend()
        .await
        .context("Storage backend selection failed")?;

    tracing::info!(
        backend = %active.backend(),
        using_remote = selector.is_using_remote(),
        "Storage initialized successfully"
    );

    Ok(selector)
}
