//! Structural image checks: size on disk, pixel dimensions, aspect ratio.
//!
//! These run before deduplication and classification because they are the
//! cheapest and catch the bulk of junk: tracking pixels, placeholder
//! thumbnails, and banner strips.

use crate::config::CleanConfig;
use crate::model::RejectReason;

/// First structural rejection that applies, or `None` when the image
/// passes.
///
/// Checks run in a fixed order (byte size, dimensions, aspect ratio) so a
/// given image always reports the same reason.
#[must_use]
pub fn structural_reject(
    config: &CleanConfig,
    byte_len: u64,
    width: u32,
    height: u32,
) -> Option<RejectReason> {
    if byte_len < config.min_bytes {
        return Some(RejectReason::BelowMinBytes);
    }
    if width < config.min_width || height < config.min_height {
        return Some(RejectReason::BelowMinDimensions);
    }
    if height == 0 {
        return Some(RejectReason::AspectRatioOutOfBounds);
    }
    let aspect = width as f32 / height as f32;
    if aspect < config.min_aspect_ratio || aspect > config.max_aspect_ratio {
        return Some(RejectReason::AspectRatioOutOfBounds);
    }
    None
}

/// Decodes just enough of the bytes to learn the image dimensions.
///
/// # Errors
///
/// Returns a diagnostic string when the bytes are not a decodable image;
/// callers treat that as a structural rejection of its own.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), String> {
    let reader = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    reader.into_dimensions().map_err(|e| e.to_string())
}
