// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Saliency-network document detector.
//
// Pre-processing (letterbox resize, ImageNet normalisation, planar layout)
// and post-processing (sigmoid, threshold, morphological close, boundary
// extraction, hull, quad) live here and are always compiled. The network
// itself sits behind the `SaliencyModel` trait; the `rten`-backed
// implementation is in `model.rs` behind the `ml` feature.

use image::RgbaImage;
use scanwerk_core::config::DetectionConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::geometry::{self, QuadConstraints};
use scanwerk_core::types::{DetectionResult, DetectionStrategy, Point};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{DocumentDetector, paper_aspect_score, side_ratio};

/// Square model input/output resolution.
pub const MODEL_INPUT_SIZE: usize = 320;

/// Fewer boundary pixels than this is not a shape.
const MIN_BOUNDARY_PIXELS: usize = 10;
/// Quads smaller than this fraction of the frame are degenerate.
const MIN_QUAD_AREA_RATIO: f64 = 0.03;
/// Coverage band considered plausible for a document.
const COVERAGE_BAND: (f64, f64) = (0.03, 0.95);

const COVERAGE_WEIGHT: f64 = 0.75;
const GEOMETRY_WEIGHT: f64 = 0.25;

/// A loaded saliency network.
///
/// `input` is a planar `1 × 3 × size × size` float tensor; the model writes a
/// `size × size` logit map into `logits` (resizing it as needed).
pub trait SaliencyModel: Send {
    fn infer(&mut self, input: &[f32], size: usize, logits: &mut Vec<f32>) -> Result<()>;
}

/// Per-channel input normalisation, `(x / 255 - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    /// ImageNet statistics.
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

/// Placement of the frame inside the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub offset_x: usize,
    pub offset_y: usize,
    pub content_width: usize,
    pub content_height: usize,
}

impl Letterbox {
    pub fn fit(frame_width: u32, frame_height: u32, size: usize) -> Self {
        let (fw, fh) = (f64::from(frame_width.max(1)), f64::from(frame_height.max(1)));
        let scale = (size as f64 / fw).min(size as f64 / fh);
        let content_width = ((fw * scale).round() as usize).clamp(1, size);
        let content_height = ((fh * scale).round() as usize).clamp(1, size);
        Self {
            scale,
            offset_x: (size - content_width) / 2,
            offset_y: (size - content_height) / 2,
            content_width,
            content_height,
        }
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.offset_x
            && x < self.offset_x + self.content_width
            && y >= self.offset_y
            && y < self.offset_y + self.content_height
    }

    /// Map a point in model pixels back to frame pixels.
    pub fn to_frame(&self, p: Point) -> Point {
        Point::new(
            (p.x - self.offset_x as f64) / self.scale,
            (p.y - self.offset_y as f64) / self.scale,
        )
    }
}

/// Buffers reused across frames.
#[derive(Debug, Default)]
struct SaliencyScratch {
    input: Vec<f32>,
    logits: Vec<f32>,
    mask: Vec<u8>,
    closed: Vec<u8>,
    boundary: Vec<Point>,
}

/// Detector backed by a saliency network.
pub struct SaliencyDetector {
    model: Option<Box<dyn SaliencyModel>>,
    size: usize,
    threshold: f32,
    normalization: Normalization,
    min_area_ratio: f64,
    max_area_ratio: f64,
    scratch: SaliencyScratch,
}

impl SaliencyDetector {
    pub fn new(model: Box<dyn SaliencyModel>, config: &DetectionConfig) -> Self {
        Self {
            model: Some(model),
            size: MODEL_INPUT_SIZE,
            threshold: config.saliency_threshold,
            normalization: Normalization::default(),
            min_area_ratio: config.min_area_ratio,
            max_area_ratio: config.max_area_ratio,
            scratch: SaliencyScratch::default(),
        }
    }

    /// Use a different square input size (the model must match it).
    pub fn with_input_size(mut self, size: usize) -> Self {
        self.size = size.max(8);
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// `false` once [`DocumentDetector::dispose`] has released the model.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Fill `scratch.input` with the letterboxed, normalised frame.
    fn preprocess(&mut self, frame: &RgbaImage) -> Letterbox {
        let size = self.size;
        let lb = Letterbox::fit(frame.width(), frame.height(), size);
        let plane = size * size;
        let input = &mut self.scratch.input;
        input.clear();
        // Padding is 0.0, i.e. the dataset mean after normalisation.
        input.resize(3 * plane, 0.0);

        let norm = self.normalization;
        let max_x = frame.width().saturating_sub(1) as f64;
        let max_y = frame.height().saturating_sub(1) as f64;

        for cy in 0..lb.content_height {
            let sy = ((cy as f64 + 0.5) / lb.scale - 0.5).clamp(0.0, max_y);
            for cx in 0..lb.content_width {
                let sx = ((cx as f64 + 0.5) / lb.scale - 0.5).clamp(0.0, max_x);
                let rgb = sample_bilinear(frame, sx, sy);
                let idx = (cy + lb.offset_y) * size + cx + lb.offset_x;
                for c in 0..3 {
                    input[c * plane + idx] = (rgb[c] / 255.0 - norm.mean[c]) / norm.std[c];
                }
            }
        }
        lb
    }

    /// Threshold the logits inside the content area and close the mask.
    /// Returns the foreground coverage of the content area.
    fn build_mask(&mut self, lb: &Letterbox) -> f64 {
        let size = self.size;
        let s = &mut self.scratch;
        s.mask.clear();
        s.mask.resize(size * size, 0);
        s.closed.clear();
        s.closed.resize(size * size, 0);

        let threshold = self.threshold;
        for y in 0..size {
            for x in 0..size {
                let i = y * size + x;
                if lb.contains(x, y) && sigmoid(s.logits[i]) >= threshold {
                    s.mask[i] = 1;
                }
            }
        }

        morphological_close(&mut s.mask, &mut s.closed, size);

        let foreground = s.mask.iter().filter(|&&m| m != 0).count();
        foreground as f64 / (lb.content_width * lb.content_height) as f64
    }

    /// Collect foreground pixels with at least one background 4-neighbour.
    fn collect_boundary(&mut self) {
        let size = self.size;
        let s = &mut self.scratch;
        s.boundary.clear();
        let on = |x: isize, y: isize| -> bool {
            x >= 0 && y >= 0 && (x as usize) < size && (y as usize) < size && s.mask[y as usize * size + x as usize] != 0
        };
        for y in 0..size as isize {
            for x in 0..size as isize {
                if !on(x, y) {
                    continue;
                }
                if !on(x - 1, y) || !on(x + 1, y) || !on(x, y - 1) || !on(x, y + 1) {
                    s.boundary.push(Point::new(x as f64, y as f64));
                }
            }
        }
    }
}

impl DocumentDetector for SaliencyDetector {
    fn name(&self) -> &'static str {
        "saliency"
    }

    fn strategy(&self) -> DetectionStrategy {
        DetectionStrategy::Ml
    }

    #[instrument(skip_all, fields(width = frame.width(), height = frame.height(), size = self.size))]
    fn detect(&mut self, frame: &RgbaImage) -> Result<DetectionResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(DetectionResult::none());
        }
        if self.model.is_none() {
            return Err(ScanwerkError::ModelUnavailable);
        }

        let lb = self.preprocess(frame);

        let size = self.size;
        let Some(model) = self.model.as_mut() else {
            return Err(ScanwerkError::ModelUnavailable);
        };
        model.infer(&self.scratch.input, size, &mut self.scratch.logits)?;
        if self.scratch.logits.len() != size * size {
            return Err(ScanwerkError::Inference(format!(
                "expected {} logits, model produced {}",
                size * size,
                self.scratch.logits.len()
            )));
        }

        let coverage = self.build_mask(&lb);
        self.collect_boundary();
        let boundary_count = self.scratch.boundary.len();
        debug!(coverage, boundary = boundary_count, "saliency mask built");
        if boundary_count < MIN_BOUNDARY_PIXELS {
            return Ok(DetectionResult::none());
        }

        let hull = geometry::convex_hull(&self.scratch.boundary);
        let Some(quad) = geometry::quad_from_hull(&hull) else {
            debug!(hull = hull.len(), "hull is degenerate");
            return Ok(DetectionResult::none());
        };

        let (fw, fh) = (f64::from(frame.width()), f64::from(frame.height()));
        let in_frame = quad.map(|p| {
            let q = lb.to_frame(p);
            Point::new(q.x.clamp(0.0, fw), q.y.clamp(0.0, fh))
        });
        let frame_area = fw * fh;
        let quad_ratio = in_frame.area() / frame_area;
        if quad_ratio < MIN_QUAD_AREA_RATIO {
            debug!(quad_ratio, "saliency quad too small");
            return Ok(DetectionResult::none());
        }

        let constraints = QuadConstraints::with_area_ratio(self.min_area_ratio, self.max_area_ratio);
        if let Err(reason) = geometry::validate_quadrilateral(in_frame.points(), frame_area, &constraints) {
            debug!(%reason, "saliency quad rejected");
            return Ok(DetectionResult::none());
        }

        let geometry_score = paper_aspect_score(side_ratio(in_frame.points()));
        let confidence = COVERAGE_WEIGHT * coverage_score(coverage) + GEOMETRY_WEIGHT * geometry_score;
        let normalized = in_frame.map(|p| Point::new(p.x / fw, p.y / fh)).clamped();

        debug!(coverage, confidence, "document found");
        Ok(DetectionResult::found(normalized, confidence))
    }

    fn dispose(&mut self) {
        if self.model.take().is_some() {
            info!("saliency model released");
        } else {
            warn!("saliency model already released");
        }
        self.scratch = SaliencyScratch::default();
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Score mask coverage: high inside the plausible band (rising until 30% of
/// the frame), falling off outside it.
fn coverage_score(coverage: f64) -> f64 {
    let (low, high) = COVERAGE_BAND;
    if coverage < low {
        0.3 * (coverage / low)
    } else if coverage > high {
        0.3
    } else {
        0.6 + 0.4 * (coverage / 0.3).min(1.0)
    }
}

/// Bilinear RGB sample at a sub-pixel position (clamped to the image).
fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> [f32; 3] {
    let (w, h) = (image.width(), image.height());
    let x0 = (x.floor() as u32).min(w - 1);
    let y0 = (y.floor() as u32).min(h - 1);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = (x - f64::from(x0)) as f32;
    let fy = (y - f64::from(y0)) as f32;

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0.0f32; 3];
    for (c, o) in out.iter_mut().enumerate() {
        let top = f32::from(p00[c]) * (1.0 - fx) + f32::from(p10[c]) * fx;
        let bottom = f32::from(p01[c]) * (1.0 - fx) + f32::from(p11[c]) * fx;
        *o = top * (1.0 - fy) + bottom * fy;
    }
    out
}

/// One 4-connected close (dilate, then erode) of a square binary mask, using
/// `temp` as the intermediate buffer. Pixels outside the grid are ignored.
fn morphological_close(mask: &mut [u8], temp: &mut [u8], size: usize) {
    let neighbours = |buf: &[u8], x: usize, y: usize| {
        let i = y * size + x;
        [
            (x > 0).then(|| buf[i - 1]),
            (x + 1 < size).then(|| buf[i + 1]),
            (y > 0).then(|| buf[i - size]),
            (y + 1 < size).then(|| buf[i + size]),
        ]
    };

    for y in 0..size {
        for x in 0..size {
            let i = y * size + x;
            let any = mask[i] != 0 || neighbours(mask, x, y).iter().flatten().any(|&v| v != 0);
            temp[i] = u8::from(any);
        }
    }
    for y in 0..size {
        for x in 0..size {
            let i = y * size + x;
            let all = temp[i] != 0 && neighbours(temp, x, y).iter().flatten().all(|&v| v != 0);
            mask[i] = u8::from(all);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Responds to the red channel relative to its mean: bright regions
    /// become positive logits, the rest negative.
    struct ContrastModel {
        gain: f32,
        offset: f32,
    }

    impl SaliencyModel for ContrastModel {
        fn infer(&mut self, input: &[f32], size: usize, logits: &mut Vec<f32>) -> Result<()> {
            let red = &input[..size * size];
            let mean = red.iter().sum::<f32>() / red.len() as f32;
            logits.clear();
            logits.extend(red.iter().map(|v| self.gain * (v - mean) - self.offset));
            Ok(())
        }
    }

    struct SilentModel;

    impl SaliencyModel for SilentModel {
        fn infer(&mut self, _input: &[f32], size: usize, logits: &mut Vec<f32>) -> Result<()> {
            logits.clear();
            logits.resize(size * size, -8.0);
            Ok(())
        }
    }

    struct BrokenModel;

    impl SaliencyModel for BrokenModel {
        fn infer(&mut self, _input: &[f32], _size: usize, _logits: &mut Vec<f32>) -> Result<()> {
            Err(ScanwerkError::Inference("session lost".into()))
        }
    }

    fn contrast_detector() -> SaliencyDetector {
        SaliencyDetector::new(
            Box::new(ContrastModel { gain: 10.0, offset: 2.0 }),
            &DetectionConfig::default(),
        )
    }

    fn sheet(fw: u32, fh: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(fw, fh, Rgba([0, 0, 0, 255]));
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        img
    }

    #[test]
    fn letterbox_centres_wide_frames() {
        let lb = Letterbox::fit(400, 300, 320);
        assert_eq!((lb.content_width, lb.content_height), (320, 240));
        assert_eq!((lb.offset_x, lb.offset_y), (0, 40));
        let back = lb.to_frame(Point::new(160.0, 160.0));
        assert!((back.x - 200.0).abs() < 1e-9 && (back.y - 150.0).abs() < 1e-9);
    }

    #[test]
    fn finds_bright_sheet() {
        let img = sheet(400, 300, 40, 37, 359, 263);
        let mut detector = contrast_detector();
        let result = detector.detect(&img).unwrap();
        let corners = result.corners.expect("sheet should be found");
        assert!(result.confidence > 0.6, "confidence {}", result.confidence);

        let truth = [(0.1, 0.123), (0.8975, 0.123), (0.8975, 0.877), (0.1, 0.877)];
        for (c, (tx, ty)) in corners.points().iter().zip(truth) {
            assert!((c.x - tx).abs() < 0.02 && (c.y - ty).abs() < 0.02, "{c:?} vs ({tx}, {ty})");
        }
    }

    #[test]
    fn uniform_gray_yields_nothing() {
        let img = RgbaImage::from_pixel(400, 300, Rgba([128, 128, 128, 255]));
        let result = contrast_detector().detect(&img).unwrap();
        assert_eq!(result, DetectionResult::none());
    }

    #[test]
    fn empty_mask_yields_nothing() {
        let img = sheet(400, 300, 40, 37, 359, 263);
        let mut detector = SaliencyDetector::new(Box::new(SilentModel), &DetectionConfig::default());
        assert_eq!(detector.detect(&img).unwrap(), DetectionResult::none());
    }

    #[test]
    fn tiny_blob_is_rejected() {
        let img = sheet(400, 300, 200, 150, 215, 165);
        let result = contrast_detector().detect(&img).unwrap();
        assert!(!result.is_found());
    }

    #[test]
    fn inference_errors_propagate() {
        let img = sheet(100, 100, 10, 10, 90, 90);
        let mut detector = SaliencyDetector::new(Box::new(BrokenModel), &DetectionConfig::default());
        let err = detector.detect(&img).unwrap_err();
        assert!(err.is_model_failure());
    }

    #[test]
    fn disposed_detector_reports_unavailable() {
        let img = sheet(100, 100, 10, 10, 90, 90);
        let mut detector = contrast_detector();
        detector.dispose();
        assert!(!detector.is_loaded());
        assert!(matches!(detector.detect(&img), Err(ScanwerkError::ModelUnavailable)));
    }

    #[test]
    fn close_fills_single_pixel_holes() {
        let size = 7;
        let mut mask = vec![0u8; size * size];
        for y in 1..6 {
            for x in 1..6 {
                mask[y * size + x] = 1;
            }
        }
        mask[3 * size + 3] = 0;
        let mut temp = vec![0u8; size * size];
        morphological_close(&mut mask, &mut temp, size);
        assert_eq!(mask[3 * size + 3], 1);
        assert_eq!(mask[0], 0);
    }

    #[test]
    fn coverage_band_scoring() {
        assert!(coverage_score(0.5) > coverage_score(0.01));
        assert!(coverage_score(0.5) > coverage_score(0.99));
        assert!((coverage_score(0.3) - 1.0).abs() < 1e-12);
    }
}
