//! dcmvault DICOM crate - Part 10 decoding, metadata extraction, previews.
//!
//! The ingestion pipeline only sees the [`Decoder`] seam and the
//! [`Extractor`] built on it. [`Part10Decoder`] is the built-in decoder; it
//! parses files with dicom-object and names attributes from the standard
//! data dictionary. `fixture` writes synthetic files for tests and
//! benchmarks.

pub mod decoder;
pub mod error;
pub mod extractor;
#[cfg(any(test, feature = "fixture"))]
pub mod fixture;
pub mod preview;

pub use decoder::Part10Decoder;
pub use error::DicomError;
pub use extractor::{DecodedObject, Decoder, Extractor};
pub use preview::{render_preview, ByteOrder, PixelData, PixelPayload};
