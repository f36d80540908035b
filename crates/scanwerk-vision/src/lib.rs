// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-vision — Pixel work for the Scanwerk document scanner.
//
// Provides the document detectors (classical edge/contour and the optional
// saliency network), perspective correction of captured pages, and the raster
// helpers used on finished pages (rotation, thumbnails, upload encoding).

pub mod detect;
pub mod image;
pub mod perspective;

// Re-export the primary types so callers can use `scanwerk_vision::ClassicalDetector` etc.
pub use detect::{ClassicalDetector, DocumentDetector, SaliencyDetector, SaliencyModel};
pub use image::processor::{ImageProcessor, prepare_for_upload};
pub use perspective::{PerspectiveCorrector, PreviewCrop};

#[cfg(feature = "ml")]
pub use detect::RtenSaliencyModel;
