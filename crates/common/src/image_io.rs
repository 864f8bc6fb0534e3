//! Image loading, cropping and JPEG writing for page rasters

use crate::{BoundingBox, ProcessingError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Default JPEG quality for crop files
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Load an image from a file path as RGB, detecting the format from its contents
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ProcessingError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("image not found: {}", path.display()),
        )));
    }

    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| {
            ProcessingError::UnsupportedFormat(format!("{}: {e}", path.display()))
        })?;

    debug!(
        "Loaded {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );

    Ok(img.to_rgb8())
}

/// Crop `bbox` out of `image`
///
/// The box is clipped to the image and truncated to whole pixels.
pub fn crop_region(image: &RgbImage, bbox: &BoundingBox) -> Result<RgbImage> {
    let clipped = bbox.clamp_to(image.width(), image.height()).truncate();
    if !clipped.is_valid() {
        return Err(ProcessingError::InvalidGeometry(format!(
            "cannot crop empty region ({}, {}, {}, {})",
            bbox.x1, bbox.y1, bbox.x2, bbox.y2
        )));
    }

    let [x1, y1, x2, y2] = clipped.to_pixels();
    Ok(image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// Write an RGB image as JPEG at the given quality (1-100)
pub fn save_jpeg<P: AsRef<Path>>(image: &RgbImage, path: P, quality: u8) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
    image.write_with_encoder(encoder)?;
    writer.flush()?;
    Ok(())
}
