//! # Resolution Ceiling and Blur Scoring
//!
//! Keeps inference inputs within the configured resolution ceiling and
//! attaches an image-sharpness score so downstream consumers can judge
//! detection reliability.
//!
//! ## Blur Score:
//! Variance of a 4-neighbour Laplacian over the BT.601 luminance of the
//! image. Higher means sharper; scores strictly below the warning threshold
//! mark the frame as blurry.

use crate::media::DecodedImage;
use image::imageops::FilterType;
use image::{ImageBuffer, Rgb};

/// Scale `img` proportionally so both dimensions fit within
/// `max_width` x `max_height`.
///
/// A frame already within bounds is returned untouched, byte for byte, so
/// quality metrics computed before and after are identical. Downscaling uses
/// a triangle (area-style) filter.
pub fn resize_to_ceiling(img: DecodedImage, max_width: u32, max_height: u32) -> DecodedImage {
    if img.width <= max_width && img.height <= max_height {
        return img;
    }

    let scale = (max_width as f64 / img.width as f64).min(max_height as f64 / img.height as f64);
    let new_width = ((img.width as f64 * scale) as u32).max(1);
    let new_height = ((img.height as f64 * scale) as u32).max(1);

    let buffer: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_raw(img.width, img.height, img.pixels)
            .expect("pixel length validated at decode");
    let resized = image::imageops::resize(&buffer, new_width, new_height, FilterType::Triangle);

    DecodedImage::new(new_width, new_height, resized.into_raw())
}

/// Compute the variance-of-Laplacian sharpness score for `img`.
pub fn blur_score(img: &DecodedImage) -> f32 {
    let width = img.width as usize;
    let height = img.height as usize;
    if width < 3 || height < 3 {
        return 0.0;
    }

    let luma = luminance(img);

    // Laplacian response over interior pixels: kernel [0 1 0; 1 -4 1; 0 1 0].
    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = luma[y * width + x];
            let response = luma[y * width + x - 1] + luma[y * width + x + 1]
                + luma[(y - 1) * width + x]
                + luma[(y + 1) * width + x]
                - 4.0 * center;
            responses.push(response);
        }
    }

    variance(&responses)
}

/// Score `img` and attach a quality warning when the score is strictly
/// below `warning_threshold`.
pub fn assess(mut img: DecodedImage, warning_threshold: f32) -> DecodedImage {
    let score = blur_score(&img);
    img.blur_score = score;
    img.quality_warning = if score < warning_threshold {
        Some(format!("blurry:score={:.1}", score))
    } else {
        None
    };
    img
}

/// BT.601 luminance plane of an RGB image.
fn luminance(img: &DecodedImage) -> Vec<f32> {
    img.pixels
        .chunks_exact(3)
        .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
        .collect()
}

fn variance(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32
}
