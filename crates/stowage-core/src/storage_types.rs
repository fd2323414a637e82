use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::time::Duration;

/// Storage backend types
///
/// Defined in core because configuration, the selector and the HTTP status
/// report all need to name a backend without depending on its implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl StorageBackend {
    pub fn is_remote(&self) -> bool {
        matches!(self, StorageBackend::S3)
    }
}

impl Display for StorageBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Local => write!(f, "local"),
        }
    }
}

pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3000;

/// Connection parameters for the S3-compatible remote backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteSettings {
    pub enabled: bool,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSettings {
    pub root: PathBuf,
    /// Base URL the `/files` route is served under, used to build public URLs.
    pub public_base_url: String,
}

/// Everything a selection run needs to build and probe backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageSettings {
    pub remote: RemoteSettings,
    pub local: LocalSettings,
    pub probe_timeout: Duration,
}

impl StorageSettings {
    /// Local-only settings rooted at `root`.
    pub fn local_only(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            remote: RemoteSettings::default(),
            local: LocalSettings {
                root: root.into(),
                public_base_url: public_base_url.into(),
            },
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.local.root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("STORAGE_PATH must not be empty"));
        }

        if self.probe_timeout.is_zero() {
            return Err(anyhow::anyhow!(
                "STORAGE_PROBE_TIMEOUT_MS must be greater than zero"
            ));
        }

        if self.remote.enabled {
            if self.remote.bucket.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow::anyhow!(
                    "S3_BUCKET_NAME must be set when S3 storage is enabled"
                ));
            }
            if self.remote.region.as_deref().map_or(true, str::is_empty) {
                return Err(anyhow::anyhow!(
                    "S3_REGION or AWS_REGION must be set when S3 storage is enabled"
                ));
            }
            if let Some(endpoint) = self.remote.endpoint.as_deref() {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "S3_ENDPOINT must start with http:// or https:// (got '{}')",
                        endpoint
                    ));
                }
            }
            if self.remote.access_key_id.is_some() != self.remote.secret_access_key.is_some() {
                return Err(anyhow::anyhow!(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together"
                ));
            }
        }

        Ok(())
    }
}

/// Supplies storage settings to the backend selector.
///
/// Read once per selection run, so a reinitialize picks up changed settings
/// without a process restart.
pub trait StorageSettingsSource: Send + Sync {
    fn storage_settings(&self) -> Result<StorageSettings, anyhow::Error>;
}

impl StorageSettingsSource for StorageSettings {
    fn storage_settings(&self) -> Result<StorageSettings, anyhow::Error> {
        self.validate()?;
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_settings() -> StorageSettings {
        let mut settings = StorageSettings::local_only("/tmp/stowage", "http://localhost:3000");
        settings.remote = RemoteSettings {
            enabled: true,
            endpoint: Some("http://localhost:9000".to_string()),
            region: Some("us-east-1".to_string()),
            bucket: Some("files".to_string()),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio-secret".to_string()),
            force_path_style: true,
        };
        settings
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(StorageBackend::S3.to_string(), "s3");
        assert!(StorageBackend::S3.is_remote());
        assert!(!StorageBackend::Local.is_remote());
    }

    #[test]
    fn test_remote_settings_valid() {
        assert!(remote_settings().validate().is_ok());
    }

    #[test]
    fn test_remote_requires_bucket() {
        let mut settings = remote_settings();
        settings.remote.bucket = None;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET_NAME"));
    }

    #[test]
    fn test_remote_rejects_bad_endpoint() {
        let mut settings = remote_settings();
        settings.remote.endpoint = Some("localhost:9000".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_disabled_remote_skips_remote_validation() {
        let mut settings = remote_settings();
        settings.remote.enabled = false;
        settings.remote.bucket = None;
        settings.remote.region = None;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_root_rejected() {
        let settings = StorageSettings::local_only("", "http://localhost:3000");
        assert!(settings.storage_settings().is_err());
    }
}
