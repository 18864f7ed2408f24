//! # Frame Decoding
//!
//! Turns the opaque payload delivered by the media stack into a
//! [`DecodedImage`]. Two payload shapes arrive in practice: frames the
//! stack already decoded (raw RGB24) and still-encoded JPEG/PNG bytes from
//! clients that send snapshots.

use crate::media::DecodedImage;
use thiserror::Error;

/// Opaque video frame payload as delivered by the track producer.
#[derive(Debug, Clone)]
pub enum VideoPayload {
    /// Already-decoded interleaved RGB24 pixels.
    Raw {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Compressed image bytes (JPEG or PNG).
    Encoded(Vec<u8>),
}

impl VideoPayload {
    /// Payload size in bytes, used for the oversize-frame guard.
    pub fn byte_len(&self) -> usize {
        match self {
            VideoPayload::Raw { data, .. } => data.len(),
            VideoPayload::Encoded(data) => data.len(),
        }
    }
}

/// Decode failure; surfaced to the client as `INVALID_IMAGE_FORMAT`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("raw frame has {actual} bytes, expected {expected} for {width}x{height} RGB24")]
    BadRawLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("raw frame has zero dimension ({width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("unsupported or corrupt image data: {0}")]
    Corrupt(#[from] image::ImageError),
}

/// Decode an inbound payload into a pixel matrix.
///
/// ## Returns:
/// - `Ok(DecodedImage)` with RGB8 pixels
/// - `Err(DecodeError)` on corrupt or unsupported input; the caller emits an
///   error event and continues the stream
pub fn decode(payload: &VideoPayload) -> Result<DecodedImage, DecodeError> {
    match payload {
        VideoPayload::Raw {
            width,
            height,
            data,
        } => {
            if *width == 0 || *height == 0 {
                return Err(DecodeError::EmptyDimensions {
                    width: *width,
                    height: *height,
                });
            }
            let expected = (*width as usize) * (*height as usize) * 3;
            if data.len() != expected {
                return Err(DecodeError::BadRawLength {
                    width: *width,
                    height: *height,
                    expected,
                    actual: data.len(),
                });
            }
            Ok(DecodedImage::new(*width, *height, data.clone()))
        }
        VideoPayload::Encoded(bytes) => {
            // Sniff the container instead of trusting an extension we do not
            // have; load_from_memory handles JPEG and PNG alike.
            let img = image::load_from_memory(bytes)?;
            let rgb = img.to_rgb8();
            let (width, height) = rgb.dimensions();
            Ok(DecodedImage::new(width, height, rgb.into_raw()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    #[test]
    fn test_decode_raw_passthrough() {
        let payload = VideoPayload::Raw {
            width: 2,
            height: 2,
            data: vec![10u8; 12],
        };
        let img = decode(&payload).unwrap();
        assert_eq!(img.width, 2);
        assert_eq!(img.height, 2);
        assert_eq!(img.pixels, vec![10u8; 12]);
        assert_eq!(img.blur_score, 0.0);
        assert!(img.quality_warning.is_none());
    }

    #[test]
    fn test_decode_raw_rejects_bad_length() {
        let payload = VideoPayload::Raw {
            width: 4,
            height: 4,
            data: vec![0u8; 10],
        };
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::BadRawLength { expected: 48, .. })
        ));
    }

    #[test]
    fn test_decode_raw_rejects_zero_dimension() {
        let payload = VideoPayload::Raw {
            width: 0,
            height: 4,
            data: vec![],
        };
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::EmptyDimensions { .. })
        ));
    }

    #[test]
    fn test_decode_jpeg_bytes() {
        let bytes = encoded_image(64, 48, ImageFormat::Jpeg);
        let img = decode(&VideoPayload::Encoded(bytes)).unwrap();
        assert_eq!((img.width, img.height), (64, 48));
        assert_eq!(img.pixels.len(), 64 * 48 * 3);
    }

    #[test]
    fn test_decode_png_bytes() {
        let bytes = encoded_image(32, 32, ImageFormat::Png);
        let img = decode(&VideoPayload::Encoded(bytes)).unwrap();
        assert_eq!((img.width, img.height), (32, 32));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let payload = VideoPayload::Encoded(vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert!(matches!(decode(&payload), Err(DecodeError::Corrupt(_))));
    }

    #[test]
    fn test_byte_len() {
        assert_eq!(
            VideoPayload::Raw {
                width: 1,
                height: 1,
                data: vec![0; 3]
            }
            .byte_len(),
            3
        );
        assert_eq!(VideoPayload::Encoded(vec![0; 7]).byte_len(), 7);
    }
}
