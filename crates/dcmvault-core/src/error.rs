use thiserror::Error;

/// Top-level error type for the dcmvault system.
///
/// Subsystem crates define their own error types where the caller needs to
/// tell failure classes apart (`DicomError`, `IngestError`); everything that
/// touches configuration, the filesystem, or the catalog surfaces here.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<toml::de::Error> for VaultError {
    fn from(err: toml::de::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for VaultError {
    fn from(err: toml::ser::Error) -> Self {
        VaultError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for dcmvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
