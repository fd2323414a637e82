//! Test helpers: build AppState and router for integration tests.
//!
//! Run from workspace root: `cargo test -p stowage-api`. Storage lives in a
//! temporary directory owned by the returned [`TestApp`].

use axum_test::TestServer;
use std::collections::HashMap;
use std::sync::Arc;
use stowage_api::setup::routes;
use stowage_api::state::AppState;
use stowage_core::Config;
use stowage_storage::BackendSelector;
use tempfile::TempDir;

pub const TEST_API_KEY: &str = "test-api-key-0123456789";

/// Test application: server plus the resources it borrows.
pub struct TestApp {
    pub server: TestServer,
    pub selector: Arc<BackendSelector>,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

/// Local-only app whose backend is selected before the first request.
pub async fn setup_test_app() -> TestApp {
    let app = setup_test_app_with(&[]).await;
    app.selector
        .active_backend()
        .await
        .expect("initial selection should succeed");
    app
}

/// App built from default test variables plus `overrides`. Selection is left
/// to the first request.
pub async fn setup_test_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let storage_path = temp_dir.path().join("storage");

    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("API_KEY".to_string(), TEST_API_KEY.to_string());
    vars.insert(
        "STORAGE_PATH".to_string(),
        storage_path.to_string_lossy().into_owned(),
    );
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    let config = Config::from_lookup(|key| vars.get(key).cloned()).expect("invalid test config");
    let selector = Arc::new(BackendSelector::from_settings_source(Arc::new(
        config.storage().clone(),
    )));
    let state = Arc::new(AppState::new(config.clone(), selector.clone()));

    let router = routes::setup_routes(&config, state)
        .await
        .expect("failed to build router");
    let server = TestServer::new(router).expect("failed to start test server");

    TestApp {
        server,
        selector,
        temp_dir,
    }
}
