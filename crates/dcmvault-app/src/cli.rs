//! CLI argument definitions for the dcmvault binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use dcmvault_core::config::StorageConfig;
use dcmvault_core::VaultConfig;

/// dcmvault - content-addressed DICOM ingestion service.
#[derive(Parser, Debug)]
#[command(name = "dcmvault", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// API server bind address.
    #[arg(long = "host")]
    pub host: Option<String>,

    /// Data directory holding staging, content slots and the catalog.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > DCMVAULT_CONFIG env var > ~/.dcmvault/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("DCMVAULT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > DCMVAULT_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        resolve_port_from(self.port, std::env::var("DCMVAULT_PORT").ok(), config_port)
    }

    /// Apply every command-line override onto a loaded config.
    pub fn apply(&self, config: &mut VaultConfig) {
        config.server.port = self.resolve_port(config.server.port);
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(ref dir) = self.data_dir {
            let sweep = config.storage.sweep_orphans_on_start;
            config.storage = StorageConfig::rooted_at(&expand_home(dir));
            config.storage.sweep_orphans_on_start = sweep;
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

fn resolve_port_from(flag: Option<u16>, env: Option<String>, config_port: u16) -> u16 {
    if let Some(p) = flag {
        return p;
    }
    if let Some(p) = env.and_then(|v| v.parse::<u16>().ok()) {
        return p;
    }
    config_port
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &std::path::Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var("HOME") {
            Ok(home) => PathBuf::from(home).join(rest),
            Err(_) => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".dcmvault").join("config.toml");
    }
    PathBuf::from("config.toml")
}
