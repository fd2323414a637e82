//! Application state shared by all handlers.

use std::sync::Arc;
use stowage_core::Config;
use stowage_storage::BackendSelector;

/// Shared application state.
///
/// The backend selector is constructed once at startup and injected here; handlers
/// ask it for the active backend on every request.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<BackendSelector>,
}

impl AppState {
    pub fn new(config: Config, storage: Arc<BackendSelector>) -> Self {
        Self { config, storage }
    }
}
