// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document detection — two interchangeable strategies behind one trait.
//
// The classical detector runs gradient-based edge detection and contour
// tracing; the saliency detector runs a small segmentation network. Both
// return the same `DetectionResult`, so the capture loop never needs to know
// which one produced a frame's result.

pub mod classical;
pub mod contours;
pub mod edges;
#[cfg(feature = "ml")]
pub mod model;
pub mod saliency;
pub mod scratch;

use image::RgbaImage;
use scanwerk_core::error::Result;
use scanwerk_core::types::{DetectionResult, DetectionStrategy};

pub use classical::ClassicalDetector;
pub use saliency::{SaliencyDetector, SaliencyModel};
pub use scratch::DetectionScratch;

#[cfg(feature = "ml")]
pub use model::RtenSaliencyModel;

/// Smallest working width `reduce_resolution` will go down to.
pub const MIN_WORKING_WIDTH: u32 = 160;

/// A per-frame document detector.
///
/// Implementations own their scratch buffers, so `detect` takes `&mut self`
/// and two detections never share buffers. `Send` lets the capture loop move
/// the detector onto a blocking worker for each frame.
pub trait DocumentDetector: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn strategy(&self) -> DetectionStrategy;

    /// Look for a document in `frame`.
    ///
    /// "Nothing found" is `Ok(DetectionResult::none())`. `Err` is reserved for
    /// resource failures such as a broken inference session.
    fn detect(&mut self, frame: &RgbaImage) -> Result<DetectionResult>;

    /// Trade accuracy for speed on slow devices. Returns `false` when the
    /// detector is already at its floor or has no resolution knob.
    fn reduce_resolution(&mut self) -> bool {
        false
    }

    /// Release heavyweight resources (e.g. an inference session).
    fn dispose(&mut self) {}
}

/// Next working width after one reduction step (×0.75, floored at
/// [`MIN_WORKING_WIDTH`]). `None` when already at the floor.
pub(crate) fn reduced_width(current: u32) -> Option<u32> {
    if current <= MIN_WORKING_WIDTH {
        return None;
    }
    let next = (f64::from(current) * 0.75).round() as u32;
    Some(next.max(MIN_WORKING_WIDTH))
}

/// Closeness of a side ratio to the ISO paper ratio √2, in `[0, 1]`.
pub(crate) fn paper_aspect_score(long_over_short: f64) -> f64 {
    const PAPER_RATIO: f64 = std::f64::consts::SQRT_2;
    if !long_over_short.is_finite() {
        return 0.0;
    }
    (1.0 - (long_over_short - PAPER_RATIO).abs() / PAPER_RATIO).max(0.0)
}

/// Long-over-short ratio of the mean opposing sides of an ordered quad.
pub(crate) fn side_ratio(corners: &[scanwerk_core::Point; 4]) -> f64 {
    let horizontal = (corners[0].distance_to(&corners[1]) + corners[3].distance_to(&corners[2])) / 2.0;
    let vertical = (corners[0].distance_to(&corners[3]) + corners[1].distance_to(&corners[2])) / 2.0;
    let (long, short) = if horizontal >= vertical {
        (horizontal, vertical)
    } else {
        (vertical, horizontal)
    };
    if short > 0.0 { long / short } else { f64::INFINITY }
}
