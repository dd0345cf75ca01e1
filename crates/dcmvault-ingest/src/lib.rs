//! dcmvault ingest crate - the content-addressed ingestion pipeline.
//!
//! [`IngestPipeline`] takes one upload from raw bytes to a committed slot and
//! catalog row, or to nothing at all. Identical metadata converges on one
//! slot and one row no matter how many uploads race for it.

pub mod abort;
pub mod error;
pub mod pipeline;
pub mod state;

pub use abort::{AbortGuard, AbortSignal};
pub use error::IngestError;
pub use pipeline::{IngestOutcome, IngestPipeline};
pub use state::PipelineState;
