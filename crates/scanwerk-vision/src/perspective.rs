// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Perspective correction — maps a photographed quadrilateral onto an upright
// rectangle through a homography, plus a cheap bounding-box crop for instant
// previews.

use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use scanwerk_core::config::CorrectionConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::geometry;
use scanwerk_core::types::{CornerSet, Point};
use tracing::{debug, info, instrument};

/// Smallest output side accepted, in pixels.
pub const MIN_OUTPUT_SIDE: u32 = 10;

/// A bounding-box crop with no de-skew.
///
/// Only good enough for an on-device preview; final pages always go through
/// [`PerspectiveCorrector::correct`]. Kept as its own type so the two cannot
/// be mixed up.
#[derive(Debug, Clone)]
pub struct PreviewCrop(RgbaImage);

impl PreviewCrop {
    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn into_image(self) -> RgbaImage {
        self.0
    }
}

/// Homography-based de-skew.
#[derive(Debug, Clone)]
pub struct PerspectiveCorrector {
    border: Rgba<u8>,
    max_output_dim: Option<u32>,
}

impl Default for PerspectiveCorrector {
    fn default() -> Self {
        Self::new(&CorrectionConfig::default())
    }
}

impl PerspectiveCorrector {
    pub fn new(config: &CorrectionConfig) -> Self {
        Self {
            border: Rgba(config.border),
            max_output_dim: config.max_output_dim,
        }
    }

    /// Output size for ordered pixel corners: the longer of each pair of
    /// opposing edges, so foreshortened content is never squeezed.
    pub fn output_size(corners: &CornerSet) -> (f64, f64) {
        let [tl, tr, br, bl] = *corners.points();
        let width = tl.distance_to(&tr).max(bl.distance_to(&br));
        let height = tl.distance_to(&bl).max(tr.distance_to(&br));
        (width, height)
    }

    /// Warp the region bounded by `corners` (normalized, any order) into an
    /// upright rectangle.
    ///
    /// Fails with [`ScanwerkError::Correction`] for anything but four finite
    /// corners, or when the resulting page would be smaller than
    /// [`MIN_OUTPUT_SIDE`] on either side.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn correct(&self, image: &RgbaImage, corners: &[Point]) -> Result<RgbaImage> {
        let pixel = to_pixel_corners(image, corners)?;
        let (raw_w, raw_h) = Self::output_size(&pixel);
        let (mut out_w, mut out_h) = (raw_w.round(), raw_h.round());
        if out_w < f64::from(MIN_OUTPUT_SIDE) || out_h < f64::from(MIN_OUTPUT_SIDE) {
            return Err(ScanwerkError::Correction(format!(
                "page would be {out_w}x{out_h} px, below the {MIN_OUTPUT_SIDE} px minimum"
            )));
        }

        if let Some(max) = self.max_output_dim {
            let longest = out_w.max(out_h);
            if longest > f64::from(max) {
                let scale = f64::from(max) / longest;
                out_w = (out_w * scale).round().max(1.0);
                out_h = (out_h * scale).round().max(1.0);
                debug!(scale, out_w, out_h, "capping output size");
            }
        }

        let src = pixel.points().map(|p| (p.x as f32, p.y as f32));
        let (w, h) = (out_w as f32, out_h as f32);
        let dest = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let projection = Projection::from_control_points(src, dest).ok_or_else(|| {
            ScanwerkError::Correction("corners do not define a valid homography".into())
        })?;

        let mut output = RgbaImage::new(out_w as u32, out_h as u32);
        warp_into(image, &projection, Interpolation::Bilinear, self.border, &mut output);

        info!(out_w = output.width(), out_h = output.height(), "Perspective correction applied");
        Ok(output)
    }

    /// Axis-aligned bounding-box crop of `corners` without de-skew.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn crop_preview(&self, image: &RgbaImage, corners: &[Point]) -> Result<PreviewCrop> {
        let pixel = to_pixel_corners(image, corners)?;
        let Some((min, max)) = geometry::bounding_box(pixel.points()) else {
            return Err(ScanwerkError::Correction("no corners".into()));
        };

        let x0 = min.x.floor().clamp(0.0, f64::from(image.width())) as u32;
        let y0 = min.y.floor().clamp(0.0, f64::from(image.height())) as u32;
        let x1 = max.x.ceil().clamp(0.0, f64::from(image.width())) as u32;
        let y1 = max.y.ceil().clamp(0.0, f64::from(image.height())) as u32;
        let (w, h) = (x1.saturating_sub(x0), y1.saturating_sub(y0));
        if w < MIN_OUTPUT_SIDE || h < MIN_OUTPUT_SIDE {
            return Err(ScanwerkError::Correction(format!(
                "crop would be {w}x{h} px, below the {MIN_OUTPUT_SIDE} px minimum"
            )));
        }

        debug!(x0, y0, w, h, "Preview crop");
        Ok(PreviewCrop(image::imageops::crop_imm(image, x0, y0, w, h).to_image()))
    }
}

/// Rounding slack on normalized corners; anything inside it is clamped.
const RANGE_EPSILON: f64 = 1e-6;

/// Validate normalized corners and convert them to ordered pixel corners.
fn to_pixel_corners(image: &RgbaImage, corners: &[Point]) -> Result<CornerSet> {
    if corners.len() != 4 {
        return Err(ScanwerkError::Correction(format!(
            "expected 4 corners, got {}",
            corners.len()
        )));
    }
    if !corners.iter().all(Point::is_finite) {
        return Err(ScanwerkError::Correction("corner coordinates are not finite".into()));
    }
    let inside = |v: f64| (-RANGE_EPSILON..=1.0 + RANGE_EPSILON).contains(&v);
    if let Some(p) = corners.iter().find(|p| !inside(p.x) || !inside(p.y)) {
        return Err(ScanwerkError::Correction(format!(
            "corner ({}, {}) lies outside the frame",
            p.x, p.y
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(ScanwerkError::Correction("source image is empty".into()));
    }

    let (w, h) = (f64::from(image.width()), f64::from(image.height()));
    CornerSet::from_slice(corners)
        .map(|c| c.clamped().map(|p| p.scaled(w, h)))
        .ok_or_else(|| ScanwerkError::Correction("expected 4 corners".into()))
}
