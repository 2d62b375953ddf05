//! Segmentation server reply format.
//!
//! One reply per connection, no framing: the connection closing marks the
//! end of the message. Layout (little-endian):
//!
//! ```text
//! u32 width | u32 height | f64 oil | f64 emulsion | f64 water | RGB pixels
//! ```

use crate::types::{Fractions, SegmentationResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use image::RgbImage;
use std::io::{Cursor, Read};
use thiserror::Error;

/// Bytes before the pixel data.
pub const HEADER_LEN: usize = 4 + 4 + 3 * 8;

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("payload truncated: {len} bytes, header needs {}", HEADER_LEN)]
    TruncatedHeader { len: usize },
    #[error("invalid mask size {width}x{height}")]
    BadDimensions { width: u32, height: u32 },
    #[error("pixel data is {actual} bytes, expected {expected}")]
    PixelLength { expected: usize, actual: usize },
    #[error("fraction {name} is not finite")]
    NonFinite { name: &'static str },
}

pub fn decode_payload(bytes: &[u8]) -> Result<SegmentationResult, PayloadError> {
    if bytes.len() < HEADER_LEN {
        return Err(PayloadError::TruncatedHeader { len: bytes.len() });
    }
    let mut cursor = Cursor::new(bytes);
    let truncated = |_| PayloadError::TruncatedHeader { len: bytes.len() };

    let width = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let height = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let oil = cursor.read_f64::<LittleEndian>().map_err(truncated)?;
    let emulsion = cursor.read_f64::<LittleEndian>().map_err(truncated)?;
    let water = cursor.read_f64::<LittleEndian>().map_err(truncated)?;

    for (name, v) in [("oil", oil), ("emulsion", emulsion), ("water", water)] {
        if !v.is_finite() {
            return Err(PayloadError::NonFinite { name });
        }
    }

    if width == 0 || height == 0 {
        return Err(PayloadError::BadDimensions { width, height });
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(3))
        .ok_or(PayloadError::BadDimensions { width, height })?;

    let mut pixels = Vec::with_capacity(bytes.len() - HEADER_LEN);
    // Reading from an in-memory cursor cannot fail.
    let _ = cursor.read_to_end(&mut pixels);
    if pixels.len() != expected {
        return Err(PayloadError::PixelLength {
            expected,
            actual: pixels.len(),
        });
    }

    let mask = RgbImage::from_raw(width, height, pixels).ok_or(PayloadError::PixelLength {
        expected,
        actual: bytes.len() - HEADER_LEN,
    })?;

    Ok(SegmentationResult {
        mask,
        fractions: Fractions::new(oil, emulsion, water),
    })
}

pub fn encode_payload(result: &SegmentationResult) -> Vec<u8> {
    let raw = result.mask.as_raw();
    let mut out = Vec::with_capacity(HEADER_LEN + raw.len());
    // Writes into a Vec are infallible.
    let _ = out.write_u32::<LittleEndian>(result.mask.width());
    let _ = out.write_u32::<LittleEndian>(result.mask.height());
    for v in result.fractions.as_array() {
        let _ = out.write_f64::<LittleEndian>(v);
    }
    out.extend_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn sample() -> SegmentationResult {
        let mut mask = RgbImage::new(3, 2);
        mask.put_pixel(0, 0, Rgb([255, 0, 0]));
        mask.put_pixel(2, 1, Rgb([0, 0, 255]));
        SegmentationResult {
            mask,
            fractions: Fractions::new(21.5, 8.25, 70.25),
        }
    }

    #[test]
    fn test_decode_splits_image_and_values() {
        let bytes = encode_payload(&sample());
        assert_eq!(bytes.len(), HEADER_LEN + 18);
        let decoded = decode_payload(&bytes).unwrap();
        assert_eq!(decoded.fractions, Fractions::new(21.5, 8.25, 70.25));
        assert_eq!(decoded.mask.dimensions(), (3, 2));
        assert_eq!(decoded.mask.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(decoded.mask.get_pixel(2, 1).0, [0, 0, 255]);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(
            decode_payload(&[]).unwrap_err(),
            PayloadError::TruncatedHeader { len: 0 }
        );
    }

    #[test]
    fn test_missing_and_trailing_pixels() {
        let mut bytes = encode_payload(&sample());
        bytes.pop();
        assert_eq!(
            decode_payload(&bytes).unwrap_err(),
            PayloadError::PixelLength {
                expected: 18,
                actual: 17
            }
        );
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(
            decode_payload(&bytes).unwrap_err(),
            PayloadError::PixelLength {
                expected: 18,
                actual: 19
            }
        );
    }

    #[test]
    fn test_zero_dimensions() {
        let mut bytes = encode_payload(&sample());
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            decode_payload(&bytes),
            Err(PayloadError::BadDimensions { width: 0, .. })
        ));
    }

    #[test]
    fn test_nan_fraction() {
        let mut bytes = encode_payload(&sample());
        bytes[16..24].copy_from_slice(&f64::NAN.to_le_bytes());
        assert_eq!(
            decode_payload(&bytes).unwrap_err(),
            PayloadError::NonFinite { name: "emulsion" }
        );
    }
}
