use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VaultError};

/// Top-level configuration for the dcmvault service.
///
/// Loaded from `~/.dcmvault/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl VaultConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VaultConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VaultError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if self.server.max_upload_bytes == 0 {
            return Err(VaultError::Config(
                "server.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.storage.staging_dir.as_os_str().is_empty()
            || self.storage.content_dir.as_os_str().is_empty()
        {
            return Err(VaultError::Config(
                "storage.staging_dir and storage.content_dir must be set".to_string(),
            ));
        }
        if self.storage.staging_dir == self.storage.content_dir {
            return Err(VaultError::Config(
                "storage.staging_dir and storage.content_dir must differ".to_string(),
            ));
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body for uploads, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3333,
            max_upload_bytes: 10 << 20,
        }
    }
}

/// Durable storage layout.
///
/// `staging_dir` and `content_dir` must live on the same filesystem so that
/// committing an original is a rename rather than a copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Private directory for in-flight uploads.
    pub staging_dir: PathBuf,
    /// Root of the content-addressed slot directories.
    pub content_dir: PathBuf,
    /// SQLite catalog file.
    pub database_path: PathBuf,
    /// Remove uncataloged slots and stale staging files before serving.
    pub sweep_orphans_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::rooted_at(Path::new("uploads"))
    }
}

impl StorageConfig {
    /// Default layout placed under a single data directory.
    pub fn rooted_at(data_dir: &Path) -> Self {
        Self {
            staging_dir: data_dir.join("staging"),
            content_dir: data_dir.join("final"),
            database_path: data_dir.join("catalog.db"),
            sweep_orphans_on_start: true,
        }
    }
}
