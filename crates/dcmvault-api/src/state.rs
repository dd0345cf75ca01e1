//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use dcmvault_core::{VaultConfig, VaultError};
use dcmvault_dicom::Extractor;
use dcmvault_ingest::IngestPipeline;
use dcmvault_storage::{Catalog, ContentStore, Database, Stager};

/// Shared application state.
///
/// All fields use `Arc` (or are cheap handles) for cloning across handler
/// tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<VaultConfig>,
    /// Catalog handle for lookups; the pipeline holds its own clone.
    pub catalog: Catalog,
    pub pipeline: Arc<IngestPipeline>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: VaultConfig, pipeline: IngestPipeline) -> Self {
        Self {
            config: Arc::new(config),
            catalog: pipeline.catalog().clone(),
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }

    /// Open the database and directories named by `config` and wire the
    /// pipeline over them.
    pub fn open(config: VaultConfig) -> Result<Self, VaultError> {
        let storage = &config.storage;
        let db = Arc::new(Database::new(&storage.database_path)?);
        let pipeline = IngestPipeline::new(
            Stager::new(&storage.staging_dir)?,
            Extractor::new(),
            ContentStore::new(&storage.content_dir)?,
            Catalog::new(db),
        );
        Ok(Self::new(config, pipeline))
    }
}
