//! DICOM Part 10 decoder backed by dicom-object.
//!
//! The file is parsed with the standard transfer syntax registry. Every
//! element whose tag is in the standard data dictionary becomes a metadata
//! field keyed by its keyword; sequences are walked and their elements
//! flattened into the same map. Pixel data is kept aside for preview
//! rendering and never becomes metadata.

use std::collections::HashMap;

use dicom_core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom_core::value::PrimitiveValue;
use dicom_core::{Tag, VR};
use dicom_dictionary_std::{tags, StandardDataDictionary};
use dicom_object::InMemDicomObject;
use tracing::debug;

use dcmvault_core::Metadata;

use crate::error::DicomError;
use crate::extractor::{DecodedObject, Decoder};
use crate::preview::{ByteOrder, PixelData, PixelPayload};

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const MAX_DEPTH: usize = 16;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// The built-in decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Part10Decoder;

impl Part10Decoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Part10Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedObject, DicomError> {
        if bytes.len() < PREAMBLE_LEN + MAGIC.len() {
            return Err(DicomError::InvalidFormat(format!(
                "file too small ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] != MAGIC {
            return Err(DicomError::InvalidFormat(
                "missing DICM prefix".to_string(),
            ));
        }

        // The reader expects the stream to start at the magic code.
        let file = dicom_object::from_reader(&bytes[PREAMBLE_LEN..])
            .map_err(|e| DicomError::InvalidFormat(e.to_string()))?;

        let meta = file.meta();
        let transfer_syntax = uid(&meta.transfer_syntax);
        let mut walker = Walker::new(if transfer_syntax == EXPLICIT_VR_BIG_ENDIAN {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        });

        walker.put("MediaStorageSOPClassUID", uid(&meta.media_storage_sop_class_uid));
        walker.put(
            "MediaStorageSOPInstanceUID",
            uid(&meta.media_storage_sop_instance_uid),
        );
        walker.put("TransferSyntaxUID", transfer_syntax);
        walker.put("ImplementationClassUID", uid(&meta.implementation_class_uid));
        if let Some(name) = &meta.implementation_version_name {
            walker.put("ImplementationVersionName", name.trim_end_matches([' ', '\0']));
        }

        walker.walk(&file, 0)?;

        debug!(
            transfer_syntax = %transfer_syntax,
            fields = walker.metadata.len(),
            has_pixels = walker.pixels.is_some(),
            "DICOM decoded"
        );

        Ok(walker.finish())
    }
}

fn uid(value: &str) -> &str {
    value.trim_end_matches(['\0', ' '])
}

struct Walker {
    metadata: Metadata,
    /// Rendered values of top-level elements, for pixel interpretation.
    top_level: HashMap<Tag, String>,
    pixels: Option<(PixelPayload, ByteOrder)>,
    /// Byte order of the dataset, for raw pixel bytes.
    order: ByteOrder,
}

impl Walker {
    fn new(order: ByteOrder) -> Self {
        Self {
            metadata: Metadata::new(),
            top_level: HashMap::new(),
            pixels: None,
            order,
        }
    }

    fn put(&mut self, keyword: &str, value: &str) {
        if !value.is_empty() {
            self.metadata.insert(keyword, value);
        }
    }

    fn walk(&mut self, object: &InMemDicomObject, depth: usize) -> Result<(), DicomError> {
        if depth > MAX_DEPTH {
            return Err(DicomError::InvalidFormat(
                "sequence nesting too deep".to_string(),
            ));
        }

        for element in object.iter() {
            let tag = element.header().tag;
            let vr = element.header().vr;

            if tag == tags::PIXEL_DATA {
                // Icon images inside sequences carry their own pixel data.
                if depth == 0 {
                    self.pixels = Some(self.pixel_payload(element.value()));
                }
                continue;
            }

            if let Some(items) = element.value().items() {
                for item in items {
                    self.walk(item, depth + 1)?;
                }
                continue;
            }

            let Some(keyword) = keyword(tag) else {
                continue;
            };
            let Some(value) = element.value().primitive() else {
                continue;
            };
            if let Some(text) = render_value(vr, value) {
                if depth == 0 {
                    self.top_level.insert(tag, text.clone());
                }
                self.metadata.insert(keyword, text);
            }
        }
        Ok(())
    }

    /// The payload plus the byte order its native bytes are in.
    ///
    /// Word-valued pixel data is parsed into host-order integers, so it is
    /// re-encoded little endian.
    fn pixel_payload(
        &self,
        value: &dicom_core::value::Value<InMemDicomObject, Vec<u8>>,
    ) -> (PixelPayload, ByteOrder) {
        if let Some(fragments) = value.fragments() {
            return (
                PixelPayload::Encapsulated {
                    fragments: fragments.len(),
                },
                self.order,
            );
        }
        match value.primitive() {
            Some(PrimitiveValue::U16(words)) => (
                PixelPayload::Native(words.iter().flat_map(|w| w.to_le_bytes()).collect()),
                ByteOrder::Little,
            ),
            Some(PrimitiveValue::I16(words)) => (
                PixelPayload::Native(words.iter().flat_map(|w| w.to_le_bytes()).collect()),
                ByteOrder::Little,
            ),
            Some(other) => (PixelPayload::Native(other.to_bytes().into_owned()), self.order),
            None => (PixelPayload::Native(Vec::new()), self.order),
        }
    }

    fn number(&self, tag: Tag) -> Option<f64> {
        self.top_level
            .get(&tag)
            .and_then(|v| v.split('\\').next())
            .and_then(|v| v.trim().parse::<f64>().ok())
    }

    fn finish(mut self) -> DecodedObject {
        let pixels = self
            .pixels
            .take()
            .map(|(payload, order)| self.pixel_data(payload, order));
        DecodedObject {
            metadata: self.metadata,
            pixels,
        }
    }

    fn pixel_data(&self, payload: PixelPayload, byte_order: ByteOrder) -> PixelData {
        let int = |tag: Tag, default: u16| self.number(tag).map(|v| v as u16).unwrap_or(default);

        let window = match (
            self.number(tags::WINDOW_CENTER),
            self.number(tags::WINDOW_WIDTH),
        ) {
            (Some(center), Some(width)) => Some((center, width)),
            _ => None,
        };

        PixelData {
            rows: int(tags::ROWS, 0),
            columns: int(tags::COLUMNS, 0),
            samples_per_pixel: int(tags::SAMPLES_PER_PIXEL, 1),
            bits_allocated: int(tags::BITS_ALLOCATED, 0),
            bits_stored: int(tags::BITS_STORED, 0),
            pixel_representation: int(tags::PIXEL_REPRESENTATION, 0),
            planar_configuration: int(tags::PLANAR_CONFIGURATION, 0),
            photometric_interpretation: self
                .top_level
                .get(&tags::PHOTOMETRIC_INTERPRETATION)
                .cloned()
                .unwrap_or_else(|| "MONOCHROME2".to_string()),
            rescale_slope: self.number(tags::RESCALE_SLOPE).unwrap_or(1.0),
            rescale_intercept: self.number(tags::RESCALE_INTERCEPT).unwrap_or(0.0),
            window,
            byte_order,
            payload,
        }
    }
}

/// Standard keyword for a public tag.
///
/// Private groups (odd) and group length elements are not metadata.
fn keyword(tag: Tag) -> Option<String> {
    if tag.group() % 2 == 1 || tag.element() == 0x0000 {
        return None;
    }
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.alias().to_string())
}

fn is_binary(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN | VR::SQ
    )
}

fn is_single_valued_text(vr: VR) -> bool {
    matches!(vr, VR::LT | VR::ST | VR::UT | VR::UR)
}

/// Render a primitive value as text, or `None` for binary VRs.
///
/// Padding is trimmed from every value; multiple values are joined with `\`.
fn render_value(vr: VR, value: &PrimitiveValue) -> Option<String> {
    if is_binary(vr) {
        return None;
    }
    let raw = value.to_str();
    let pad = |c: char| c == '\0' || c == ' ';

    if is_single_valued_text(vr) {
        return Some(raw.trim_end_matches(pad).to_string());
    }
    Some(
        raw.split('\\')
            .map(|part| part.trim_matches(pad))
            .collect::<Vec<_>>()
            .join("\\"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::DicomFileBuilder;
    use dcmvault_core::Fingerprint;
    use dicom_core::dicom_value;

    fn decode(bytes: &[u8]) -> Result<DecodedObject, DicomError> {
        Part10Decoder::new().decode(bytes)
    }

    #[test]
    fn test_decode_explicit_little_endian() {
        let bytes = DicomFileBuilder::new()
            .text(tags::PATIENT_ID, VR::LO, "123")
            .text(tags::MODALITY, VR::CS, "CT")
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("PatientID"), Some("123"));
        assert_eq!(decoded.metadata.get("Modality"), Some("CT"));
        assert_eq!(
            decoded.metadata.get("TransferSyntaxUID"),
            Some(EXPLICIT_VR_LITTLE_ENDIAN)
        );
        assert!(decoded.pixels.is_none());
    }

    #[test]
    fn test_decode_implicit_little_endian() {
        let bytes = DicomFileBuilder::implicit_little_endian()
            .text(tags::PATIENT_ID, VR::LO, "ABC")
            .us(tags::ROWS, 2)
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("PatientID"), Some("ABC"));
        assert_eq!(decoded.metadata.get("Rows"), Some("2"));
        assert_eq!(
            decoded.metadata.get("TransferSyntaxUID"),
            Some(IMPLICIT_VR_LITTLE_ENDIAN)
        );
    }

    #[test]
    fn test_decode_explicit_big_endian() {
        let bytes = DicomFileBuilder::explicit_big_endian()
            .us(tags::COLUMNS, 0x0102)
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("Columns"), Some("258"));
    }

    #[test]
    fn test_same_fields_in_different_syntaxes_differ_only_by_syntax_uid() {
        let fields = |builder: DicomFileBuilder| {
            builder
                .text(tags::PATIENT_ID, VR::LO, "1")
                .text(tags::MODALITY, VR::CS, "MR")
                .build()
        };
        let explicit = decode(&fields(DicomFileBuilder::new())).unwrap();
        let implicit = decode(&fields(DicomFileBuilder::implicit_little_endian())).unwrap();

        let strip = |m: &Metadata| -> Vec<(String, String)> {
            m.iter()
                .filter(|(k, _)| *k != "TransferSyntaxUID")
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        assert_eq!(strip(&explicit.metadata), strip(&implicit.metadata));
    }

    #[test]
    fn test_full_dictionary_attributes_are_kept() {
        let bytes = DicomFileBuilder::new()
            .text(tags::PATIENT_ID, VR::LO, "P1")
            .text(tags::ECHO_TIME, VR::DS, "10")
            .text(tags::REPETITION_TIME, VR::DS, "500")
            .text(tags::SCANNING_SEQUENCE, VR::CS, "SE")
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("EchoTime"), Some("10"));
        assert_eq!(decoded.metadata.get("RepetitionTime"), Some("500"));
        assert_eq!(decoded.metadata.get("ScanningSequence"), Some("SE"));
    }

    #[test]
    fn test_acquisition_parameters_change_the_fingerprint() {
        let series = |echo: &str, repetition: &str| {
            let bytes = DicomFileBuilder::new()
                .text(tags::PATIENT_ID, VR::LO, "P1")
                .text(tags::MODALITY, VR::CS, "MR")
                .text(tags::ECHO_TIME, VR::DS, echo)
                .text(tags::REPETITION_TIME, VR::DS, repetition)
                .build();
            decode(&bytes).unwrap().metadata
        };
        let t1 = series("10", "500");
        let t2 = series("90", "4000");

        assert_ne!(t1, t2);
        assert_ne!(
            Fingerprint::of(&t1).unwrap(),
            Fingerprint::of(&t2).unwrap()
        );
    }

    #[test]
    fn test_text_padding_is_trimmed() {
        let bytes = DicomFileBuilder::new()
            .text(tags::IMAGE_TYPE, VR::CS, "ORIGINAL\\PRIMARY \\AXIAL ")
            .text(tags::STUDY_DESCRIPTION, VR::LO, "  HEAD  ")
            .text(tags::IMAGE_COMMENTS, VR::LT, "a\\b  ")
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            decoded.metadata.get("ImageType"),
            Some("ORIGINAL\\PRIMARY\\AXIAL")
        );
        assert_eq!(decoded.metadata.get("StudyDescription"), Some("HEAD"));
        assert_eq!(decoded.metadata.get("ImageComments"), Some("a\\b"));
    }

    #[test]
    fn test_private_tags_are_skipped() {
        let bytes = DicomFileBuilder::new()
            .text(Tag(0x0009, 0x0010), VR::LO, "VENDOR")
            .text(tags::MODALITY, VR::CS, "CT")
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("Modality"), Some("CT"));
        assert!(decoded.metadata.iter().all(|(_, v)| v != "VENDOR"));
    }

    #[test]
    fn test_sequences_are_flattened() {
        let items = vec![
            DicomFileBuilder::new().text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, "1.1"),
            DicomFileBuilder::new().text(tags::REFERENCED_SOP_CLASS_UID, VR::UI, "2.2"),
        ];
        let bytes = DicomFileBuilder::implicit_little_endian()
            .sequence(tags::REFERENCED_IMAGE_SEQUENCE, items)
            .text(tags::MODALITY, VR::CS, "CT")
            .build();

        let decoded = decode(&bytes).unwrap();
        // Last writer wins when nested items repeat a field.
        assert_eq!(decoded.metadata.get("ReferencedSOPClassUID"), Some("2.2"));
        assert_eq!(decoded.metadata.get("Modality"), Some("CT"));
        assert!(decoded.metadata.get("ReferencedImageSequence").is_none());
    }

    #[test]
    fn test_native_pixel_data_is_captured() {
        let bytes = DicomFileBuilder::new()
            .text(tags::MODALITY, VR::CS, "CT")
            .monochrome_u16(2, 2, &[0, 100, 200, 300])
            .build();

        let decoded = decode(&bytes).unwrap();
        let pixels = decoded.pixels.unwrap();
        assert_eq!(pixels.rows, 2);
        assert_eq!(pixels.columns, 2);
        assert_eq!(pixels.bits_allocated, 16);
        match pixels.payload {
            PixelPayload::Native(ref bytes) => {
                assert_eq!(bytes.len(), 8);
                assert_eq!(pixels.byte_order.u16([bytes[2], bytes[3]]), 100);
            }
            ref other => panic!("expected native pixels, got {:?}", other),
        }
        assert!(decoded.metadata.get("PixelData").is_none());
    }

    #[test]
    fn test_encapsulated_pixel_data() {
        let bytes = DicomFileBuilder::with_transfer_syntax(crate::fixture::JPEG_BASELINE)
            .text(tags::MODALITY, VR::CS, "US")
            .encapsulated_pixels(vec![vec![0xFF, 0xD8, 0xFF, 0xD9]])
            .build();

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.metadata.get("Modality"), Some("US"));
        assert!(matches!(
            decoded.pixels.unwrap().payload,
            PixelPayload::Encapsulated { fragments: 1 }
        ));
    }

    #[test]
    fn test_rejects_missing_prefix() {
        let mut bytes = DicomFileBuilder::new().build();
        bytes[PREAMBLE_LEN] = b'X';
        assert!(matches!(decode(&bytes), Err(DicomError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_small_and_random_input() {
        assert!(matches!(decode(b"hello"), Err(DicomError::InvalidFormat(_))));
        let noise: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        assert!(matches!(decode(&noise), Err(DicomError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_truncated_meta_group() {
        let bytes = DicomFileBuilder::new()
            .text(tags::PATIENT_NAME, VR::PN, "DOE^JANE")
            .build();
        let cut = &bytes[..PREAMBLE_LEN + MAGIC.len() + 20];
        assert!(matches!(decode(cut), Err(DicomError::InvalidFormat(_))));
    }

    #[test]
    fn test_rejects_excessive_nesting() {
        let mut nested = DicomFileBuilder::new().text(tags::MODALITY, VR::CS, "CT");
        for _ in 0..(MAX_DEPTH + 1) {
            nested = DicomFileBuilder::new().sequence(tags::REFERENCED_IMAGE_SEQUENCE, vec![nested]);
        }
        let err = decode(&nested.build()).unwrap_err();
        assert!(err.to_string().contains("too deep"), "{}", err);
    }

    #[test]
    fn test_render_values() {
        assert_eq!(
            render_value(VR::US, &dicom_value!(U16, [1, 2])).unwrap(),
            "1\\2"
        );
        assert_eq!(
            render_value(VR::SS, &dicom_value!(I16, [-5])).unwrap(),
            "-5"
        );
        assert_eq!(
            render_value(VR::FD, &dicom_value!(F64, [1.5])).unwrap(),
            "1.5"
        );
        assert!(render_value(VR::OB, &dicom_value!(U8, [1, 2, 3])).is_none());
    }

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(keyword(tags::ECHO_TIME).as_deref(), Some("EchoTime"));
        assert_eq!(keyword(tags::PATIENT_ID).as_deref(), Some("PatientID"));
        assert_eq!(keyword(Tag(0x0009, 0x0010)), None);
        assert_eq!(keyword(Tag(0x0008, 0x0000)), None);
    }
}
