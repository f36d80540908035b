// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster helpers for finished pages: decoding, quarter-turn rotation,
// thumbnails, and the downscale + JPEG step applied before pages leave the
// device.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::Rotation;
use tracing::{debug, info, instrument};

/// Image pipeline operating on a single in-memory page.
///
/// Each transformation consumes `self` and returns the transformed processor,
/// so steps chain:
///
/// ```ignore
/// let jpeg = ImageProcessor::from_rgba(page)
///     .rotate(Rotation::Deg90)
///     .fit_within(2000)
///     .to_jpeg_bytes(85)?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|err| {
            ScanwerkError::ImageError(format!("failed to open {}: {}", path.display(), err))
        })?;
        info!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Decode raw encoded bytes (JPEG, PNG, ...).
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data)
            .map_err(|err| ScanwerkError::ImageError(format!("failed to decode image: {}", err)))?;
        debug!(width = img.width(), height = img.height(), "Image decoded from bytes");
        Ok(Self { image: img })
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        Self {
            image: DynamicImage::ImageRgba8(image),
        }
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Consume the processor and return 8-bit RGBA pixels, converting if needed.
    pub fn into_rgba(self) -> RgbaImage {
        match self.image {
            DynamicImage::ImageRgba8(rgba) => rgba,
            other => other.to_rgba8(),
        }
    }

    // -- Transformations ------------------------------------------------------

    /// Lossless clockwise quarter-turn rotation.
    #[instrument(skip(self), fields(degrees = rotation.degrees()))]
    pub fn rotate(self, rotation: Rotation) -> Self {
        let image = match rotation {
            Rotation::Deg0 => return self,
            Rotation::Deg90 => self.image.rotate90(),
            Rotation::Deg180 => self.image.rotate180(),
            Rotation::Deg270 => self.image.rotate270(),
        };
        debug!(width = image.width(), height = image.height(), "Rotation applied");
        Self { image }
    }

    /// Scale down so the longer side is at most `max_dim`, preserving aspect.
    /// Images already within bounds are left untouched.
    #[instrument(skip(self), fields(max_dim))]
    pub fn fit_within(self, max_dim: u32) -> Self {
        let (w, h) = (self.image.width(), self.image.height());
        if max_dim == 0 || w.max(h) <= max_dim {
            return self;
        }
        info!(from_w = w, from_h = h, max_dim, "Downscaling image");
        let resized = self.image.resize(max_dim, max_dim, FilterType::Lanczos3);
        debug!(new_w = resized.width(), new_h = resized.height(), "Resize complete");
        Self { image: resized }
    }

    /// Fast, lower-quality downscale for review-strip thumbnails.
    pub fn thumbnail(self, max_dim: u32) -> Self {
        let (w, h) = (self.image.width(), self.image.height());
        if max_dim == 0 || w.max(h) <= max_dim {
            return self;
        }
        Self {
            image: self.image.thumbnail(max_dim, max_dim),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|err| ScanwerkError::ImageError(format!("PNG encoding failed: {}", err)))?;
        Ok(buffer)
    }

    /// Encode the current image as JPEG bytes with the given quality (1-100).
    /// Alpha is dropped.
    pub fn to_jpeg_bytes(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let rgb = self.image.to_rgb8();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        rgb.write_with_encoder(encoder)
            .map_err(|err| ScanwerkError::ImageError(format!("JPEG encoding failed: {}", err)))?;
        Ok(buffer)
    }

    /// Write the image to a file; the format follows the extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image.save(path).map_err(|err| {
            ScanwerkError::ImageError(format!("failed to save image to {}: {}", path.display(), err))
        })
    }
}

/// Downscale a finished page to `max_dim` on its longer side and encode it as
/// JPEG, ready for upload.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn prepare_for_upload(image: RgbaImage, max_dim: u32, quality: u8) -> Result<Vec<u8>> {
    let bytes = ImageProcessor::from_rgba(image)
        .fit_within(max_dim)
        .to_jpeg_bytes(quality)?;
    debug!(bytes = bytes.len(), "Page encoded for upload");
    Ok(bytes)
}
