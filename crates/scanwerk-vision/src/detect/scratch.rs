// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reusable per-detector buffers.
//
// Sized on first use (or when the working resolution changes) and reused for
// every later frame, so steady-state detection does not touch the allocator
// for its large buffers.

use std::ops::Range;

use scanwerk_core::Point;

/// Working buffers for the classical pipeline.
#[derive(Debug, Default)]
pub struct DetectionScratch {
    width: usize,
    height: usize,
    /// Downscaled luminance.
    pub gray: Vec<u8>,
    /// Horizontal blur pass.
    pub temp: Vec<u8>,
    /// Blurred luminance.
    pub blurred: Vec<u8>,
    /// Sobel L1 magnitude, saturated at 255.
    pub edges: Vec<u8>,
    /// 1 where the edge magnitude passed the threshold.
    pub binary: Vec<u8>,
    /// Pixels already claimed by a traced contour.
    pub visited: Vec<u8>,
    /// Traced contours of the current frame.
    pub contours: ContourSet,
    /// `(area, contour index)` candidates of the current frame.
    pub candidates: Vec<(f64, usize)>,
}

impl DetectionScratch {
    /// Make every buffer hold exactly `width * height` entries. Capacity is
    /// kept across calls, so shrinking and regrowing does not reallocate.
    pub fn ensure(&mut self, width: usize, height: usize) {
        let len = width * height;
        if self.width != width || self.height != height {
            self.width = width;
            self.height = height;
            for buf in [
                &mut self.gray,
                &mut self.temp,
                &mut self.blurred,
                &mut self.edges,
                &mut self.binary,
                &mut self.visited,
            ] {
                buf.clear();
                buf.resize(len, 0);
            }
        }
        self.contours.clear();
        self.candidates.clear();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }
}

/// A flat pool of closed contours: all points in one vector, one range per
/// contour.
#[derive(Debug, Default)]
pub struct ContourSet {
    points: Vec<Point>,
    spans: Vec<Range<usize>>,
}

impl ContourSet {
    pub fn clear(&mut self) {
        self.points.clear();
        self.spans.clear();
    }

    /// Start a new contour; push its points with [`ContourSet::push_point`]
    /// and close it with [`ContourSet::finish`].
    pub fn begin(&mut self) -> usize {
        self.points.len()
    }

    pub fn push_point(&mut self, x: usize, y: usize) {
        self.points.push(Point::new(x as f64, y as f64));
    }

    /// Close the contour started at `start`.
    pub fn finish(&mut self, start: usize) {
        self.spans.push(start..self.points.len());
    }

    /// Drop the contour started at `start` without recording it.
    pub fn discard(&mut self, start: usize) {
        self.points.truncate(start);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[Point]> {
        self.spans.get(index).map(|span| &self.points[span.clone()])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Point]> {
        self.spans.iter().map(|span| &self.points[span.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_follow_working_size() {
        let mut scratch = DetectionScratch::default();
        scratch.ensure(32, 24);
        assert_eq!(scratch.gray.len(), 32 * 24);
        scratch.gray[5] = 9;
        scratch.ensure(16, 12);
        assert_eq!(scratch.edges.len(), 16 * 12);
        assert!(scratch.gray.iter().all(|&v| v == 0));
    }

    #[test]
    fn contour_pool_keeps_spans() {
        let mut set = ContourSet::default();
        let a = set.begin();
        set.push_point(1, 1);
        set.push_point(2, 1);
        set.finish(a);
        let b = set.begin();
        set.push_point(7, 7);
        set.discard(b);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).unwrap().len(), 2);
        assert!(set.get(1).is_none());
    }
}
