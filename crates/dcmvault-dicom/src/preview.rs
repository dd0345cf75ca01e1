//! Preview rendering: native pixel data to an 8-bit PNG.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

use crate::error::DicomError;

/// Byte order of native pixel samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn u16(self, b: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes(b),
            ByteOrder::Big => u16::from_be_bytes(b),
        }
    }
}

/// Pixel payload as it appeared in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelPayload {
    /// Uncompressed frames, exactly as stored.
    Native(Vec<u8>),
    /// Compressed fragments; only the count is kept.
    Encapsulated { fragments: usize },
}

/// Image pixel module attributes plus the raw payload.
#[derive(Debug, Clone)]
pub struct PixelData {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    /// 0 = unsigned, 1 = two's complement.
    pub pixel_representation: u16,
    pub planar_configuration: u16,
    pub photometric_interpretation: String,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// (center, width) of the first VOI window, if present.
    pub window: Option<(f64, f64)>,
    pub byte_order: ByteOrder,
    pub payload: PixelPayload,
}

impl PixelData {
    fn pixel_count(&self) -> usize {
        usize::from(self.rows) * usize::from(self.columns)
    }

    fn native(&self) -> Result<&[u8], DicomError> {
        match &self.payload {
            PixelPayload::Native(bytes) => Ok(bytes),
            PixelPayload::Encapsulated { fragments } => Err(DicomError::NoRenderableData(
                format!("compressed pixel data ({} fragments)", fragments),
            )),
        }
    }
}

/// Render the first frame as PNG bytes.
///
/// Supports monochrome images at 8 or 16 bits allocated and 8-bit RGB. Other
/// layouts, and all compressed transfer syntaxes, yield
/// [`DicomError::NoRenderableData`].
pub fn render_preview(pixels: &PixelData) -> Result<Vec<u8>, DicomError> {
    let data = pixels.native()?;
    if pixels.rows == 0 || pixels.columns == 0 {
        return Err(DicomError::NoRenderableData(format!(
            "empty image {}x{}",
            pixels.columns, pixels.rows
        )));
    }

    let image = match pixels.photometric_interpretation.trim() {
        "MONOCHROME1" | "MONOCHROME2" if pixels.samples_per_pixel == 1 => {
            DynamicImage::ImageLuma8(render_monochrome(pixels, data)?)
        }
        "RGB" if pixels.samples_per_pixel == 3 => DynamicImage::ImageRgb8(render_rgb(pixels, data)?),
        other => {
            return Err(DicomError::NoRenderableData(format!(
                "unsupported photometric interpretation {} with {} samples",
                other, pixels.samples_per_pixel
            )))
        }
    };

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| DicomError::NoRenderableData(format!("PNG encoding failed: {}", e)))?;
    Ok(out.into_inner())
}

fn render_monochrome(pixels: &PixelData, data: &[u8]) -> Result<GrayImage, DicomError> {
    let count = pixels.pixel_count();
    let bytes_per_sample = match pixels.bits_allocated {
        8 => 1,
        16 => 2,
        other => {
            return Err(DicomError::NoRenderableData(format!(
                "unsupported bits allocated {}",
                other
            )))
        }
    };
    if data.len() < count * bytes_per_sample {
        return Err(DicomError::NoRenderableData(format!(
            "pixel data has {} bytes, expected {}",
            data.len(),
            count * bytes_per_sample
        )));
    }

    let stored = match pixels.bits_stored {
        0 => pixels.bits_allocated,
        n => n.min(pixels.bits_allocated),
    };
    let signed = pixels.pixel_representation == 1;

    let values: Vec<f64> = data[..count * bytes_per_sample]
        .chunks_exact(bytes_per_sample)
        .map(|c| {
            let raw = if bytes_per_sample == 1 {
                u32::from(c[0])
            } else {
                u32::from(pixels.byte_order.u16([c[0], c[1]]))
            };
            let value = sample_value(raw, stored, signed);
            value * pixels.rescale_slope + pixels.rescale_intercept
        })
        .collect();

    let map = VoiMapping::new(pixels.window, &values);
    let invert = pixels.photometric_interpretation.trim() == "MONOCHROME1";
    let gray: Vec<u8> = values
        .iter()
        .map(|v| {
            let g = map.apply(*v);
            if invert {
                255 - g
            } else {
                g
            }
        })
        .collect();

    GrayImage::from_raw(u32::from(pixels.columns), u32::from(pixels.rows), gray)
        .ok_or_else(|| DicomError::NoRenderableData("pixel buffer size mismatch".to_string()))
}

fn render_rgb(pixels: &PixelData, data: &[u8]) -> Result<RgbImage, DicomError> {
    if pixels.bits_allocated != 8 {
        return Err(DicomError::NoRenderableData(format!(
            "unsupported RGB bits allocated {}",
            pixels.bits_allocated
        )));
    }
    let count = pixels.pixel_count();
    if data.len() < count * 3 {
        return Err(DicomError::NoRenderableData(format!(
            "pixel data has {} bytes, expected {}",
            data.len(),
            count * 3
        )));
    }

    let rgb = if pixels.planar_configuration == 1 {
        let (r, rest) = data.split_at(count);
        let (g, b) = rest.split_at(count);
        (0..count).flat_map(|i| [r[i], g[i], b[i]]).collect()
    } else {
        data[..count * 3].to_vec()
    };

    RgbImage::from_raw(u32::from(pixels.columns), u32::from(pixels.rows), rgb)
        .ok_or_else(|| DicomError::NoRenderableData("pixel buffer size mismatch".to_string()))
}

/// Mask to `bits` and sign-extend when the representation is signed.
fn sample_value(raw: u32, bits: u16, signed: bool) -> f64 {
    let bits = u32::from(bits.clamp(1, 16));
    let masked = raw & ((1u32 << bits) - 1);
    if signed && masked & (1 << (bits - 1)) != 0 {
        f64::from(masked as i32 - (1i32 << bits))
    } else {
        f64::from(masked)
    }
}

/// Maps modality values to display gray levels.
enum VoiMapping {
    Window { center: f64, width: f64 },
    MinMax { min: f64, max: f64 },
}

impl VoiMapping {
    fn new(window: Option<(f64, f64)>, values: &[f64]) -> Self {
        if let Some((center, width)) = window {
            if width >= 1.0 {
                return VoiMapping::Window { center, width };
            }
        }
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        VoiMapping::MinMax { min, max }
    }

    fn apply(&self, v: f64) -> u8 {
        let scaled = match *self {
            VoiMapping::Window { center, width } => {
                let c = center - 0.5;
                let w = width - 1.0;
                if v <= c - w / 2.0 {
                    0.0
                } else if v > c + w / 2.0 {
                    255.0
                } else if w <= 0.0 {
                    255.0
                } else {
                    ((v - c) / w + 0.5) * 255.0
                }
            }
            VoiMapping::MinMax { min, max } => {
                if max > min {
                    (v - min) / (max - min) * 255.0
                } else {
                    0.0
                }
            }
        };
        scaled.round().clamp(0.0, 255.0) as u8
    }
}
