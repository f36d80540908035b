// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Classical document detector.
//
// Pipeline on a downscaled working buffer:
//   1. Box-filter downscale to integer luminance
//   2. Separable 3×3 blur
//   3. Sobel magnitude (L1)
//   4. Adaptive global threshold
//   5. Moore contour tracing
//   6. For the largest contours: RDP simplification to a quadrilateral,
//      validated by the geometry kernel
//   7. Confidence from area ratio and closeness to paper proportions

use image::RgbaImage;
use scanwerk_core::config::DetectionConfig;
use scanwerk_core::error::Result;
use scanwerk_core::geometry::{self, QuadConstraints};
use scanwerk_core::types::{CornerSet, DetectionResult, DetectionStrategy, Point};
use tracing::{debug, info, instrument, trace};

use super::contours::trace_contours;
use super::edges::{adaptive_threshold, blur3x3, downscale_luma, sobel_l1, working_size};
use super::scratch::DetectionScratch;
use super::{DocumentDetector, paper_aspect_score, reduced_width, side_ratio};

/// RDP tolerance as a fraction of the contour perimeter.
const EPSILON_FRACTION: f64 = 0.02;
/// Second, more aggressive attempt for contours that keep too many vertices.
const RETRY_EPSILON_FRACTION: f64 = 0.04;

const AREA_WEIGHT: f64 = 0.6;
const ASPECT_WEIGHT: f64 = 0.4;

/// Edge- and contour-based detector. Cheap, dependency-free, and always
/// available; the default strategy and the fallback for the saliency path.
pub struct ClassicalDetector {
    working_width: u32,
    min_area_ratio: f64,
    max_area_ratio: f64,
    edge_threshold_floor: f64,
    edge_threshold_gain: f64,
    max_candidates: usize,
    scratch: DetectionScratch,
}

impl ClassicalDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            working_width: config.working_width,
            min_area_ratio: config.min_area_ratio,
            max_area_ratio: config.max_area_ratio,
            edge_threshold_floor: config.edge_threshold_floor,
            edge_threshold_gain: config.edge_threshold_gain,
            max_candidates: config.max_candidates.max(1),
            scratch: DetectionScratch::default(),
        }
    }

    /// Current working buffer width in pixels.
    pub fn working_width(&self) -> u32 {
        self.working_width
    }

    fn constraints(&self) -> QuadConstraints {
        QuadConstraints::with_area_ratio(self.min_area_ratio, self.max_area_ratio)
    }
}

impl Default for ClassicalDetector {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}

impl DocumentDetector for ClassicalDetector {
    fn name(&self) -> &'static str {
        "classical"
    }

    fn strategy(&self) -> DetectionStrategy {
        DetectionStrategy::Classical
    }

    #[instrument(
        skip_all,
        fields(width = frame.width(), height = frame.height(), working_width = self.working_width)
    )]
    fn detect(&mut self, frame: &RgbaImage) -> Result<DetectionResult> {
        if frame.width() < 3 || frame.height() < 3 {
            return Ok(DetectionResult::none());
        }

        let (w, h) = working_size(frame.width(), frame.height(), self.working_width);
        let constraints = self.constraints();
        let max_candidates = self.max_candidates;
        let s = &mut self.scratch;
        s.ensure(w, h);

        downscale_luma(frame, w, h, &mut s.gray);
        blur3x3(&s.gray, &mut s.temp, &mut s.blurred, w, h);
        sobel_l1(&s.blurred, &mut s.edges, w, h);

        let Some(threshold) =
            adaptive_threshold(&s.edges, &mut s.binary, self.edge_threshold_floor, self.edge_threshold_gain)
        else {
            debug!("no edges in frame");
            return Ok(DetectionResult::none());
        };

        trace_contours(&s.binary, &mut s.visited, w, h, &mut s.contours);

        let frame_area = (w * h) as f64;
        for (index, contour) in s.contours.iter().enumerate() {
            let ratio = geometry::polygon_area(contour).abs() / frame_area;
            if ratio >= constraints.min_area_ratio && ratio <= constraints.max_area_ratio {
                s.candidates.push((ratio, index));
            }
        }
        s.candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        s.candidates.truncate(max_candidates);

        debug!(
            threshold,
            contours = s.contours.len(),
            candidates = s.candidates.len(),
            "edge map traced"
        );

        for &(area_ratio, index) in &s.candidates {
            let Some(contour) = s.contours.get(index) else {
                continue;
            };
            let Some(quad) = quad_from_contour(contour, frame_area, &constraints) else {
                trace!(index, area_ratio, "contour rejected");
                continue;
            };

            let corners = CornerSet::from_points(quad);
            let quad_ratio = corners.area() / frame_area;
            let confidence = AREA_WEIGHT * quad_ratio + ASPECT_WEIGHT * paper_aspect_score(side_ratio(corners.points()));
            let normalized = corners
                .map(|p| Point::new(p.x / w as f64, p.y / h as f64))
                .clamped();

            debug!(area_ratio = quad_ratio, confidence, "document found");
            return Ok(DetectionResult::found(normalized, confidence));
        }

        Ok(DetectionResult::none())
    }

    fn reduce_resolution(&mut self) -> bool {
        match reduced_width(self.working_width) {
            Some(next) => {
                info!(from = self.working_width, to = next, "reducing detection resolution");
                self.working_width = next;
                true
            }
            None => false,
        }
    }
}

/// Simplify a traced contour to four vertices and validate them.
///
/// A contour that still has more than four vertices gets one retry with a
/// coarser tolerance; fewer than four, or an invalid quad, ends the attempt.
fn quad_from_contour(contour: &[Point], frame_area: f64, constraints: &QuadConstraints) -> Option<[Point; 4]> {
    for fraction in [EPSILON_FRACTION, RETRY_EPSILON_FRACTION] {
        let epsilon = geometry::adaptive_epsilon(contour, fraction);
        let vertices = geometry::simplify_closed_contour(contour, epsilon);
        match vertices.len() {
            4 => {
                geometry::validate_quadrilateral(&vertices, frame_area, constraints).ok()?;
                return vertices.try_into().ok();
            }
            n if n > 4 => continue,
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as PixelPoint;

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// A white rectangle covering 60% of a 400×300 frame with a √2 aspect.
    fn sheet_on_black() -> (RgbaImage, [Point; 4]) {
        let (fw, fh) = (400u32, 300u32);
        let (rw, rh) = (319u32, 226u32);
        let (x0, y0) = ((fw - rw) / 2, (fh - rh) / 2);
        let mut img = RgbaImage::from_pixel(fw, fh, BLACK);
        for y in y0..y0 + rh {
            for x in x0..x0 + rw {
                img.put_pixel(x, y, WHITE);
            }
        }
        let n = |x: u32, y: u32| Point::new(f64::from(x) / f64::from(fw), f64::from(y) / f64::from(fh));
        let truth = [
            n(x0, y0),
            n(x0 + rw, y0),
            n(x0 + rw, y0 + rh),
            n(x0, y0 + rh),
        ];
        (img, truth)
    }

    fn assert_close(found: &CornerSet, truth: &[Point; 4], tolerance: f64) {
        for (f, t) in found.points().iter().zip(truth) {
            assert!(
                (f.x - t.x).abs() <= tolerance && (f.y - t.y).abs() <= tolerance,
                "corner {f:?} not within {tolerance} of {t:?}"
            );
        }
    }

    #[test]
    fn finds_white_sheet_on_black() {
        let (img, truth) = sheet_on_black();
        let mut detector = ClassicalDetector::default();
        let result = detector.detect(&img).unwrap();

        let corners = result.corners.expect("sheet should be detected");
        assert!(result.confidence > 0.6, "confidence {}", result.confidence);
        assert_close(&corners, &truth, 0.02);
    }

    #[test]
    fn finds_skewed_sheet() {
        let mut img = RgbaImage::from_pixel(400, 300, BLACK);
        let quad = [
            PixelPoint::new(80, 60),
            PixelPoint::new(330, 40),
            PixelPoint::new(350, 250),
            PixelPoint::new(60, 270),
        ];
        draw_polygon_mut(&mut img, &quad, WHITE);
        let truth = quad.map(|p| Point::new(f64::from(p.x) / 400.0, f64::from(p.y) / 300.0));

        let result = ClassicalDetector::default().detect(&img).unwrap();
        let corners = result.corners.expect("skewed sheet should be detected");
        assert_close(&corners, &truth, 0.03);
    }

    #[test]
    fn uniform_gray_yields_nothing() {
        let img = RgbaImage::from_pixel(400, 300, Rgba([128, 128, 128, 255]));
        let result = ClassicalDetector::default().detect(&img).unwrap();
        assert_eq!(result, DetectionResult::none());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn tiny_frames_are_not_errors() {
        let img = RgbaImage::from_pixel(2, 2, WHITE);
        assert!(!ClassicalDetector::default().detect(&img).unwrap().is_found());
    }

    #[test]
    fn small_specks_are_ignored() {
        let mut img = RgbaImage::from_pixel(400, 300, BLACK);
        for y in 100..110 {
            for x in 100..110 {
                img.put_pixel(x, y, WHITE);
            }
        }
        assert!(!ClassicalDetector::default().detect(&img).unwrap().is_found());
    }

    #[test]
    fn reduced_resolution_still_detects() {
        let (img, truth) = sheet_on_black();
        let mut detector = ClassicalDetector::default();
        assert!(detector.reduce_resolution());
        assert_eq!(detector.working_width(), 240);
        let corners = detector.detect(&img).unwrap().corners.expect("detected at 240 px");
        assert_close(&corners, &truth, 0.02);
    }
}
