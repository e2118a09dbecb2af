//! Image encoding: `DynamicImage` → PNG bytes.
//!
//! PNG is chosen over JPEG because it is lossless. Dimension strings and
//! title-block text on plan sheets are thin strokes, and JPEG ringing around
//! them costs the model far more accuracy than the extra bytes cost bandwidth.

use crate::error::ExtractError;
use crate::output::EncodedImage;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<EncodedImage, ExtractError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ExtractError::render(format!("PNG encoding failed: {e}")))?;

    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(EncodedImage::png(buf))
}
