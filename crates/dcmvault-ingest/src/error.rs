//! Ingest failure classes.

use dcmvault_core::VaultError;
use dcmvault_dicom::DicomError;

use crate::state::PipelineState;

/// Why an ingest failed.
///
/// By the time one of these leaves the pipeline, the staging file is gone
/// and any slot claimed by this run has been discarded.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to stage upload: {0}")]
    Stage(VaultError),

    #[error("Invalid DICOM file: {0}")]
    InvalidFormat(String),

    #[error("No renderable pixel data: {0}")]
    NoRenderableData(String),

    #[error("Storage failure: {0}")]
    Storage(VaultError),

    #[error("Catalog failure: {0}")]
    Catalog(VaultError),

    #[error("Ingest aborted in state {0}")]
    Aborted(PipelineState),
}

impl IngestError {
    /// Failures caused by the uploaded content rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidFormat(_) | IngestError::NoRenderableData(_)
        )
    }
}

impl From<DicomError> for IngestError {
    fn from(err: DicomError) -> Self {
        match err {
            DicomError::InvalidFormat(msg) => IngestError::InvalidFormat(msg),
            DicomError::NoRenderableData(msg) => IngestError::NoRenderableData(msg),
            DicomError::Io(e) => IngestError::Storage(VaultError::Io(e)),
        }
    }
}
