//! Editing-mask preparation for image-edit requests.
//!
//! The editor sends the provider a screenshot with a transparent region
//! marking where to regenerate content. This helper clears the alpha of a
//! centered square and re-encodes to PNG (the only format the provider's
//! edit endpoint accepts for masks).

use std::io::Cursor;

use image::ImageFormat;
use tracing::debug;

use super::{ImageDecoder, ImageRsDecoder};
use crate::error::GenerationError;

/// Clears the alpha channel of a centered `mask_size` x `mask_size` square
/// and returns the image re-encoded as PNG.
///
/// The square is clipped to the image bounds, so a mask larger than the
/// image clears everything. Pure: the input bytes are not modified.
///
/// # Errors
///
/// Propagates the decoder's `MalformedResponse`/`UnsupportedFormat` for
/// undecodable input, and `Internal` if PNG encoding fails.
pub fn mask_center_square(image_bytes: &[u8], mask_size: u32) -> Result<Vec<u8>, GenerationError> {
    let mut image = ImageRsDecoder.decode(image_bytes)?;
    let (width, height) = image.dimensions();

    let start_x = (width / 2).saturating_sub(mask_size / 2);
    let start_y = (height / 2).saturating_sub(mask_size / 2);
    let end_x = (start_x + mask_size).min(width);
    let end_y = (start_y + mask_size).min(height);

    for y in start_y..end_y {
        for x in start_x..end_x {
            image.get_pixel_mut(x, y).0[3] = 0;
        }
    }

    debug!(
        width,
        height,
        mask_size,
        cleared = (end_x - start_x) as u64 * (end_y - start_y) as u64,
        "Prepared center-masked image"
    );

    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| GenerationError::Internal(format!("mask PNG encode failed: {e}")))?;
    Ok(buffer.into_inner())
}
