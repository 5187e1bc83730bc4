//! Profile image normalization.
//!
//! Uploaded avatars arrive in whatever format the browser had; they are
//! scaled down to a bounded size and re-encoded as lossy WebP before storage.

use anyhow::{Context, Result};
use image::GenericImageView;

/// Output of [`prepare_profile_image`].
#[derive(Debug)]
pub struct PreparedImage {
    /// WebP-encoded bytes
    pub data: Vec<u8>,
    pub original_dimensions: (u32, u32),
    pub final_dimensions: (u32, u32),
    pub was_resized: bool,
}

/// Check for the WebP magic bytes (RIFF....WEBP).
pub fn is_webp(data: &[u8]) -> bool {
    data.len() >= 12 && data[0..4] == *b"RIFF" && data[8..12] == *b"WEBP"
}

/// Decode, bound to `max_dimension` on the longer side (aspect ratio kept),
/// and encode as lossy WebP at the given quality (1-100).
pub fn prepare_profile_image(
    data: &[u8],
    max_dimension: u32,
    quality: u8,
) -> Result<PreparedImage> {
    let img = image::load_from_memory(data).context("failed to decode image")?;

    let (orig_w, orig_h) = img.dimensions();

    let (new_w, new_h, was_resized) = if orig_w > max_dimension || orig_h > max_dimension {
        let scale = (max_dimension as f64) / (orig_w.max(orig_h) as f64);
        let new_w = ((orig_w as f64) * scale).round() as u32;
        let new_h = ((orig_h as f64) * scale).round() as u32;
        (new_w.max(1), new_h.max(1), true)
    } else {
        (orig_w, orig_h, false)
    };

    let processed = if was_resized {
        img.resize(new_w, new_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgba = processed.to_rgba8();
    let (width, height) = rgba.dimensions();

    let encoder = webp::Encoder::from_rgba(&rgba, width, height);
    let webp_data = encoder.encode(quality as f32);

    Ok(PreparedImage {
        data: webp_data.to_vec(),
        original_dimensions: (orig_w, orig_h),
        final_dimensions: (width, height),
        was_resized,
    })
}
