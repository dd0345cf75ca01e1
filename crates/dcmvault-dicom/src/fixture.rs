//! Synthetic Part 10 files for tests and benchmarks.
//!
//! Available to this crate's tests and, through the `fixture` feature, to
//! dependents' tests and benches.

use dicom_core::value::{DataSetSequence, PixelFragmentSequence, PrimitiveValue};
use dicom_core::{DataElement, Length};
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};

pub use dicom_core::{Tag, VR};
pub use dicom_dictionary_std::tags;

pub use crate::decoder::{
    EXPLICIT_VR_BIG_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN,
};

pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const SOP_INSTANCE_UID: &str = "1.2.826.0.1.3680043.8.498.1";

/// Builds a Part 10 file element by element.
///
/// Setting a tag twice keeps the last value. When used as a sequence item,
/// a builder's own transfer syntax is ignored in favor of the enclosing
/// file's.
#[derive(Debug, Clone)]
pub struct DicomFileBuilder {
    transfer_syntax: String,
    object: InMemDicomObject,
}

impl Default for DicomFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DicomFileBuilder {
    /// Explicit VR little endian.
    pub fn new() -> Self {
        Self::with_transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN)
    }

    pub fn implicit_little_endian() -> Self {
        Self::with_transfer_syntax(IMPLICIT_VR_LITTLE_ENDIAN)
    }

    pub fn explicit_big_endian() -> Self {
        Self::with_transfer_syntax(EXPLICIT_VR_BIG_ENDIAN)
    }

    pub fn with_transfer_syntax(uid: &str) -> Self {
        Self {
            transfer_syntax: uid.to_string(),
            object: InMemDicomObject::new_empty(),
        }
    }

    /// A string-valued element.
    pub fn text(self, tag: Tag, vr: VR, value: &str) -> Self {
        self.put(DataElement::new(tag, vr, PrimitiveValue::from(value)))
    }

    /// A single US value.
    pub fn us(self, tag: Tag, value: u16) -> Self {
        self.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)))
    }

    /// A sequence with one item per builder.
    pub fn sequence(self, tag: Tag, items: Vec<DicomFileBuilder>) -> Self {
        let items: Vec<InMemDicomObject> = items.into_iter().map(|b| b.object).collect();
        self.put(DataElement::new(
            tag,
            VR::SQ,
            DataSetSequence::new(items, Length::UNDEFINED),
        ))
    }

    /// A single-frame unsigned 16-bit MONOCHROME2 image.
    pub fn monochrome_u16(self, rows: u16, columns: u16, pixels: &[u16]) -> Self {
        self.image_attributes(rows, columns, 1, "MONOCHROME2", 16)
            .put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(pixels.iter().copied().collect()),
            ))
    }

    /// A single-frame 8-bit interleaved RGB image.
    pub fn rgb_u8(self, rows: u16, columns: u16, pixels: &[u8]) -> Self {
        self.image_attributes(rows, columns, 3, "RGB", 8)
            .us(tags::PLANAR_CONFIGURATION, 0)
            .put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PrimitiveValue::U8(pixels.iter().copied().collect()),
            ))
    }

    /// Encapsulated pixel data with an empty offset table.
    pub fn encapsulated_pixels(self, fragments: Vec<Vec<u8>>) -> Self {
        self.image_attributes(1, 1, 1, "MONOCHROME2", 8)
            .put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OB,
                PixelFragmentSequence::new(Vec::<u32>::new(), fragments),
            ))
    }

    fn image_attributes(
        self,
        rows: u16,
        columns: u16,
        samples: u16,
        photometric: &str,
        bits: u16,
    ) -> Self {
        self.us(tags::SAMPLES_PER_PIXEL, samples)
            .text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, photometric)
            .us(tags::ROWS, rows)
            .us(tags::COLUMNS, columns)
            .us(tags::BITS_ALLOCATED, bits)
            .us(tags::BITS_STORED, bits)
            .us(tags::HIGH_BIT, bits - 1)
            .us(tags::PIXEL_REPRESENTATION, 0)
    }

    fn put(mut self, element: DataElement<InMemDicomObject, Vec<u8>>) -> Self {
        self.object.put(element);
        self
    }

    /// Serialize to a complete Part 10 file, preamble included.
    pub fn build(&self) -> Vec<u8> {
        let file = self
            .object
            .clone()
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(self.transfer_syntax.as_str())
                    .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid(SOP_INSTANCE_UID),
            )
            .expect("fixture file meta is complete");

        let mut out = Vec::new();
        file.write_all(&mut out)
            .expect("fixture dataset is writable");
        out
    }
}

/// A 4x4 16-bit CT slice with a fixed set of identifying fields.
///
/// Files built with the same arguments decode to identical metadata.
pub fn sample_ct(patient_id: &str) -> Vec<u8> {
    sample_ct_with(patient_id, "CT")
}

pub fn sample_ct_with(patient_id: &str, modality: &str) -> Vec<u8> {
    let pixels: Vec<u16> = (0..16u16).map(|i| i * 100).collect();
    DicomFileBuilder::new()
        .text(tags::SOP_CLASS_UID, VR::UI, CT_IMAGE_STORAGE)
        .text(tags::SOP_INSTANCE_UID, VR::UI, SOP_INSTANCE_UID)
        .text(tags::STUDY_DATE, VR::DA, "20240115")
        .text(tags::MODALITY, VR::CS, modality)
        .text(tags::PATIENT_NAME, VR::PN, "DOE^JOHN")
        .text(tags::PATIENT_ID, VR::LO, patient_id)
        .text(tags::STUDY_INSTANCE_UID, VR::UI, "1.2.826.0.1.3680043.8.498.2")
        .text(tags::SERIES_INSTANCE_UID, VR::UI, "1.2.826.0.1.3680043.8.498.3")
        .text(tags::INSTANCE_NUMBER, VR::IS, "1")
        .text(tags::WINDOW_CENTER, VR::DS, "800")
        .text(tags::WINDOW_WIDTH, VR::DS, "1600")
        .text(tags::RESCALE_INTERCEPT, VR::DS, "0")
        .text(tags::RESCALE_SLOPE, VR::DS, "1")
        .monochrome_u16(4, 4, &pixels)
        .build()
}
