//! The ingestion pipeline.
//!
//! One call to [`IngestPipeline::ingest`] stages the upload, decodes it,
//! fingerprints the metadata, claims the slot for that fingerprint, moves
//! the original and its preview in, and inserts the catalog row. Every exit
//! path before the insert leaves no trace: the staged blob releases itself
//! and a slot guard discards a claimed slot unless the run reaches the
//! catalog.

use std::io::Read;

use chrono::Utc;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use dcmvault_core::{Fingerprint, NewArtifact, VaultError};
use dcmvault_dicom::{Decoder, Extractor, Part10Decoder};
use dcmvault_storage::{
    Catalog, CatalogStore, ContentStore, InsertOutcome, SlotClaim, SlotStore, Stager,
};

use crate::abort::AbortSignal;
use crate::error::IngestError;
use crate::state::{PipelineState, Progress};

/// Result of a successful ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// This upload was committed.
    Created {
        id: i64,
        fingerprint: Fingerprint,
        location: String,
        size: u64,
    },
    /// Content with the same fingerprint is already stored.
    ///
    /// `existing_id` is known when the catalog insert found the winning
    /// row; it is `None` when the existence check or the slot claim detected the
    /// duplicate.
    Duplicate {
        fingerprint: Fingerprint,
        existing_id: Option<i64>,
    },
}

impl IngestOutcome {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            IngestOutcome::Created { fingerprint, .. }
            | IngestOutcome::Duplicate { fingerprint, .. } => fingerprint,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

/// Discards a claimed slot on drop unless kept.
struct SlotGuard<'a, S: SlotStore + ?Sized> {
    store: &'a S,
    fingerprint: Fingerprint,
    armed: bool,
}

impl<'a, S: SlotStore + ?Sized> SlotGuard<'a, S> {
    fn new(store: &'a S, fingerprint: Fingerprint) -> Self {
        Self {
            store,
            fingerprint,
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<S: SlotStore + ?Sized> Drop for SlotGuard<'_, S> {
    fn drop(&mut self) {
        if self.armed {
            warn!(fingerprint = %self.fingerprint, "Discarding uncommitted slot");
            self.store.discard_slot(&self.fingerprint);
        }
    }
}

/// Stages, decodes, deduplicates, and commits uploads.
pub struct IngestPipeline<D: Decoder = Part10Decoder, S = ContentStore, C = Catalog> {
    stager: Stager,
    extractor: Extractor<D>,
    store: S,
    catalog: C,
}

impl<D: Decoder, S: SlotStore, C: CatalogStore> IngestPipeline<D, S, C> {
    pub fn new(stager: Stager, extractor: Extractor<D>, store: S, catalog: C) -> Self {
        Self {
            stager,
            extractor,
            store,
            catalog,
        }
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Ingest one upload.
    pub fn ingest<R: Read>(&self, reader: R) -> Result<IngestOutcome, IngestError> {
        self.ingest_with_signal(reader, &AbortSignal::new())
    }

    /// Ingest one upload, stopping at the next state boundary once `signal`
    /// trips.
    pub fn ingest_with_signal<R: Read>(
        &self,
        reader: R,
        signal: &AbortSignal,
    ) -> Result<IngestOutcome, IngestError> {
        let ingest_id = Uuid::new_v4();
        let span = info_span!("ingest", %ingest_id);
        let _enter = span.enter();

        let mut progress = Progress::new(signal);
        let result = self.run(reader, &mut progress);

        match &result {
            Ok(IngestOutcome::Created {
                id,
                fingerprint,
                size,
                ..
            }) => info!(id, %fingerprint, size, "Artifact ingested"),
            Ok(IngestOutcome::Duplicate {
                fingerprint,
                existing_id,
            }) => info!(%fingerprint, ?existing_id, "Duplicate upload"),
            Err(e) if e.is_client_error() => {
                warn!(state = %progress.state(), error = %e, "Upload rejected")
            }
            Err(e) => error!(state = %progress.state(), error = %e, "Ingest failed"),
        }
        result
    }

    fn run<R: Read>(
        &self,
        reader: R,
        progress: &mut Progress<'_>,
    ) -> Result<IngestOutcome, IngestError> {
        progress.check()?;
        let mut staged = self.stager.stage(reader).map_err(IngestError::Stage)?;
        progress.advance(PipelineState::Staged)?;

        let staged_path = staged.path().ok_or_else(|| {
            IngestError::Storage(VaultError::Storage("staged file missing".to_string()))
        })?;
        let decoded = self.extractor.extract(staged_path)?;
        progress.advance(PipelineState::Decoded)?;

        let canonical = self.extractor.serialize_metadata(&decoded.metadata)?;
        let fingerprint = Fingerprint::of_canonical(&canonical);
        progress.advance(PipelineState::FingerprintKnown)?;

        let location = self
            .store
            .original_path(&fingerprint)
            .to_string_lossy()
            .into_owned();
        if self
            .catalog
            .exists(&location)
            .map_err(IngestError::Catalog)?
        {
            return Ok(IngestOutcome::Duplicate {
                fingerprint,
                existing_id: None,
            });
        }
        progress.advance(PipelineState::DedupChecked)?;

        match self
            .store
            .create_slot(&fingerprint)
            .map_err(IngestError::Storage)?
        {
            SlotClaim::Claimed(_) => {}
            SlotClaim::AlreadyExists => {
                return Ok(IngestOutcome::Duplicate {
                    fingerprint,
                    existing_id: None,
                })
            }
        }
        let slot = SlotGuard::new(&self.store, fingerprint);
        progress.advance(PipelineState::SlotClaimed)?;

        let preview = self.extractor.render_preview(&decoded)?;
        self.store
            .commit_original(&mut staged, &fingerprint)
            .map_err(IngestError::Storage)?;
        progress.advance(PipelineState::OriginalCommitted)?;

        self.store
            .commit_preview(&preview, &fingerprint)
            .map_err(IngestError::Storage)?;
        progress.advance(PipelineState::PreviewCommitted)?;

        let size = staged.size();
        let inserted = self
            .catalog
            .insert_if_absent(&NewArtifact {
                location: location.clone(),
                fingerprint,
                size,
                metadata: canonical,
                ingested_at: Utc::now(),
            })
            .map_err(IngestError::Catalog)?;
        // The row references this slot either way: ours, or an earlier
        // winner's with the same fingerprint.
        slot.keep();
        progress.advance(PipelineState::Cataloged)?;
        staged.release();

        Ok(match inserted {
            InsertOutcome::Inserted(id) => IngestOutcome::Created {
                id,
                fingerprint,
                location,
                size,
            },
            InsertOutcome::Existing(id) => IngestOutcome::Duplicate {
                fingerprint,
                existing_id: Some(id),
            },
        })
    }
}
