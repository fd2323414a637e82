//! Configuration module
//!
//! Server, security and storage settings, loaded from the environment (and an
//! optional `.env` file). Storage settings are also exposed through
//! [`EnvStorageSettings`] so the backend selector can re-read them on every
//! selection run.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage_types::{
    LocalSettings, RemoteSettings, StorageSettings, StorageSettingsSource,
    DEFAULT_PROBE_TIMEOUT_MS,
};

// Common constants
const SERVER_PORT: u16 = 3000;
const MAX_UPLOAD_SIZE_MB: usize = 50;
const JSON_BODY_LIMIT_KB: usize = 1024;
const RATE_LIMIT_WINDOW_MS: u64 = 15 * 60 * 1000;
const RATE_LIMIT_MAX: u32 = 100;
const MIN_API_KEY_LEN: usize = 16;
const DEFAULT_STORAGE_PATH: &str = "./storage";

/// HTTP server and security settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub cors_origins: Vec<String>,
    pub enforce_https: bool,
    pub api_key: String,
    pub max_upload_size_bytes: usize,
    pub json_body_limit_bytes: usize,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
}

/// File service configuration
#[derive(Clone, Debug)]
pub struct FileServiceConfig {
    pub base: BaseConfig,
    pub storage: StorageSettings,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<FileServiceConfig>);

impl Config {
    fn inner(&self) -> &FileServiceConfig {
        &self.0
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (the environment in
    /// production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = FileServiceConfig::from_lookup(&lookup)?;
        Ok(Config(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_env(&self.inner().base.environment)
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.inner().base.cors_origins
    }

    pub fn enforce_https(&self) -> bool {
        self.inner().base.enforce_https
    }

    pub fn api_key(&self) -> &str {
        &self.inner().base.api_key
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        self.inner().base.max_upload_size_bytes
    }

    pub fn json_body_limit_bytes(&self) -> usize {
        self.inner().base.json_body_limit_bytes
    }

    pub fn rate_limit_window(&self) -> Duration {
        self.inner().base.rate_limit_window
    }

    pub fn rate_limit_max(&self) -> u32 {
        self.inner().base.rate_limit_max
    }

    pub fn storage(&self) -> &StorageSettings {
        &self.inner().storage
    }
}

impl FileServiceConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let server_port: u16 = lookup("PORT")
            .unwrap_or_else(|| SERVER_PORT.to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?;

        let cors_origins = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_upload_size_mb = lookup("MAX_UPLOAD_SIZE_MB")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(MAX_UPLOAD_SIZE_MB);

        let json_body_limit_kb = lookup("JSON_BODY_LIMIT_KB")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(JSON_BODY_LIMIT_KB);

        let base = BaseConfig {
            server_port,
            environment,
            cors_origins,
            enforce_https: parse_bool(lookup("ENFORCE_HTTPS"), false),
            api_key: lookup("API_KEY")
                .ok_or_else(|| anyhow::anyhow!("API_KEY must be set for the /api routes"))?,
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            json_body_limit_bytes: json_body_limit_kb * 1024,
            rate_limit_window: Duration::from_millis(
                lookup("RATE_LIMIT_WINDOW_MS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(RATE_LIMIT_WINDOW_MS),
            ),
            rate_limit_max: lookup("RATE_LIMIT_MAX")
                .and_then(|s| s.parse().ok())
                .unwrap_or(RATE_LIMIT_MAX),
        };

        let storage = storage_settings_from_lookup(lookup, server_port);

        let config = FileServiceConfig { base, storage };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.base.api_key.len() < MIN_API_KEY_LEN {
            return Err(anyhow::anyhow!(
                "API_KEY must be at least {} characters long",
                MIN_API_KEY_LEN
            ));
        }

        if is_production_env(&self.base.environment)
            && self.base.cors_origins.iter().any(|o| o == "*")
        {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.base.rate_limit_max == 0 || self.base.rate_limit_window.is_zero() {
            return Err(anyhow::anyhow!(
                "RATE_LIMIT_MAX and RATE_LIMIT_WINDOW_MS must be greater than zero"
            ));
        }

        self.storage.validate()
    }
}

/// Storage settings read from the process environment on every call.
#[derive(Clone, Debug, Default)]
pub struct EnvStorageSettings;

impl StorageSettingsSource for EnvStorageSettings {
    fn storage_settings(&self) -> Result<StorageSettings, anyhow::Error> {
        dotenvy::dotenv().ok();
        let lookup = |key: &str| env::var(key).ok();
        let port = lookup("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(SERVER_PORT);
        let settings = storage_settings_from_lookup(&lookup, port);
        settings.validate()?;
        Ok(settings)
    }
}

fn storage_settings_from_lookup<F>(lookup: &F, server_port: u16) -> StorageSettings
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

    let remote = RemoteSettings {
        enabled: parse_bool(lookup("S3_ENABLED"), false),
        endpoint: non_empty("S3_ENDPOINT"),
        region: non_empty("S3_REGION").or_else(|| non_empty("AWS_REGION")),
        bucket: non_empty("S3_BUCKET_NAME"),
        access_key_id: non_empty("S3_ACCESS_KEY_ID"),
        secret_access_key: non_empty("S3_SECRET_ACCESS_KEY"),
        force_path_style: parse_bool(lookup("S3_FORCE_PATH_STYLE"), false),
    };

    let local = LocalSettings {
        root: PathBuf::from(
            lookup("STORAGE_PATH").unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string()),
        ),
        public_base_url: non_empty("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", server_port)),
    };

    let probe_timeout_ms = lookup("STORAGE_PROBE_TIMEOUT_MS")
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS);

    StorageSettings {
        remote,
        local,
        probe_timeout: Duration::from_millis(probe_timeout_ms),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => true,
        Some(v) if v == "false" || v == "0" || v == "no" => false,
        _ => default,
    }
}

fn is_production_env(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}
