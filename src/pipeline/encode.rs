//! Image encoding shared by the converters, Optimize and Describe.
//!
//! PNG everywhere: it is lossless, so text inside figures stays crisp for
//! the vision model, and the optimised files keep the `.png` name their
//! originals were given at extraction.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded {}x{} image → {} bytes PNG", img.width(), img.height(), buf.len());
    Ok(buf)
}

/// Base64 payload for a vision request body.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Shrink `img` so its longest side is `max_dimension`, keeping aspect ratio.
///
/// Images already within bounds are returned unchanged (never upscaled).
pub fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}
