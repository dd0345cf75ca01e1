//! The decoder seam and the extractor the pipeline calls.

use std::path::Path;

use tracing::debug;

use dcmvault_core::Metadata;

use crate::error::DicomError;
use crate::decoder::Part10Decoder;
use crate::preview::{self, PixelData};

/// Anything that can turn Part 10 bytes into metadata and pixels.
pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedObject, DicomError>;
}

/// A decoded file: textual metadata plus the pixel data, if any.
#[derive(Debug, Clone)]
pub struct DecodedObject {
    pub metadata: Metadata,
    pub pixels: Option<PixelData>,
}

/// Reads staged files and produces metadata, previews, and canonical bytes.
#[derive(Debug, Clone, Default)]
pub struct Extractor<D: Decoder = Part10Decoder> {
    decoder: D,
}

impl Extractor<Part10Decoder> {
    pub fn new() -> Self {
        Self::with_decoder(Part10Decoder::new())
    }
}

impl<D: Decoder> Extractor<D> {
    pub fn with_decoder(decoder: D) -> Self {
        Self { decoder }
    }

    /// Decode the file at `path`.
    pub fn extract(&self, path: &Path) -> Result<DecodedObject, DicomError> {
        let bytes = std::fs::read(path)?;
        let decoded = self.decoder.decode(&bytes)?;
        debug!(
            path = %path.display(),
            bytes = bytes.len(),
            fields = decoded.metadata.len(),
            "Extracted metadata"
        );
        Ok(decoded)
    }

    /// Render a PNG preview of a decoded object.
    pub fn render_preview(&self, decoded: &DecodedObject) -> Result<Vec<u8>, DicomError> {
        let pixels = decoded.pixels.as_ref().ok_or_else(|| {
            DicomError::NoRenderableData("no pixel data element".to_string())
        })?;
        preview::render_preview(pixels)
    }

    /// Canonical metadata bytes, as stored and fingerprinted.
    pub fn serialize_metadata(&self, metadata: &Metadata) -> Result<Vec<u8>, DicomError> {
        metadata
            .canonical_bytes()
            .map_err(|e| DicomError::InvalidFormat(format!("metadata not serializable: {}", e)))
    }
}
