//! # Video Frame Preprocessing
//!
//! Converts opaque inbound track frames into validated pixel matrices ready
//! for inference:
//!
//! - **Decode**: raw RGB24 passthrough or JPEG/PNG decode (`decode`)
//! - **Resize**: proportional downscale to the configured ceiling
//!   resolution (`quality::resize_to_ceiling`)
//! - **Quality**: variance-of-Laplacian blur scoring with a configurable
//!   warning threshold (`quality`)

pub mod decode;
pub mod quality;

pub use decode::{decode, DecodeError, VideoPayload};

/// A decoded video frame: 3-channel 8-bit RGB, row-major.
///
/// `blur_score` and `quality_warning` are populated by
/// [`quality::assess`] after resize; a freshly decoded image carries a zero
/// score and no warning.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// RGB8 pixel data, `width * height * 3` bytes.
    pub pixels: Vec<u8>,
    pub blur_score: f32,
    pub quality_warning: Option<String>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 3) as usize);
        Self {
            width,
            height,
            pixels,
            blur_score: 0.0,
            quality_warning: None,
        }
    }
}
