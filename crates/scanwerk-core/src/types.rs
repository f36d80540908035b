// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scanning pipeline.
//
// All cross-component coordinates are normalized to [0, 1] relative to the
// frame so that results are resolution-independent. Detector internals work
// in pixel space and convert on the way out.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry;

/// A 2D point. Normalized to `[0, 1]` unless a function says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance_to(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Scale both axes, e.g. to convert between normalized and pixel space.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self::new(self.x * sx, self.y * sy)
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Exactly four corners, always ordered top-left, top-right, bottom-right,
/// bottom-left (clockwise on screen, starting top-left).
///
/// The only way to build one is through [`CornerSet::from_points`] (or serde,
/// which goes through the same path), so the order invariant cannot be
/// bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Point; 4]", into = "[Point; 4]")]
pub struct CornerSet([Point; 4]);

impl CornerSet {
    /// Build a corner set from four points in any order.
    pub fn from_points(points: [Point; 4]) -> Self {
        Self(geometry::order_corners_cw(points))
    }

    /// Build a corner set from a slice; `None` unless it holds exactly four
    /// points.
    pub fn from_slice(points: &[Point]) -> Option<Self> {
        let points: [Point; 4] = points.try_into().ok()?;
        Some(Self::from_points(points))
    }

    /// The whole frame, used when a page has no detected corners.
    pub fn full_frame() -> Self {
        Self([
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ])
    }

    pub fn points(&self) -> &[Point; 4] {
        &self.0
    }

    pub fn top_left(&self) -> Point {
        self.0[0]
    }

    pub fn top_right(&self) -> Point {
        self.0[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.0[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.0[3]
    }

    /// Largest distance any single corner moved between `self` and `other`.
    pub fn max_displacement(&self, other: &CornerSet) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.distance_to(b))
            .fold(0.0, f64::max)
    }

    /// Map every corner through `f` and re-establish the corner order.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self::from_points(self.0.map(f))
    }

    /// Clamp every coordinate into `[0, 1]`.
    pub fn clamped(&self) -> Self {
        self.map(|p| Point::new(p.x.clamp(0.0, 1.0), p.y.clamp(0.0, 1.0)))
    }

    /// Absolute enclosed area (normalized units when the corners are
    /// normalized, i.e. the fraction of the frame covered).
    pub fn area(&self) -> f64 {
        geometry::polygon_area(&self.0).abs()
    }
}

impl From<[Point; 4]> for CornerSet {
    fn from(points: [Point; 4]) -> Self {
        Self::from_points(points)
    }
}

impl From<CornerSet> for [Point; 4] {
    fn from(corners: CornerSet) -> Self {
        corners.0
    }
}

/// Outcome of one detection pass over one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// `None` means no document was found in this frame.
    pub corners: Option<CornerSet>,
    /// Heuristic score in `[0, 1]`; not a calibrated probability.
    pub confidence: f64,
}

impl DetectionResult {
    /// The "nothing found" result: no corners, zero confidence.
    pub const fn none() -> Self {
        Self {
            corners: None,
            confidence: 0.0,
        }
    }

    /// A successful detection. Confidence is clamped into `[0, 1]`.
    pub fn found(corners: CornerSet, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            corners: Some(corners),
            confidence,
        }
    }

    pub fn is_found(&self) -> bool {
        self.corners.is_some()
    }
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::none()
    }
}

/// Which detector a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionStrategy {
    /// Grayscale → blur → Sobel → threshold → contours → quad.
    #[default]
    Classical,
    /// Saliency network → mask → hull → quad.
    Ml,
}

impl std::fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Classical => f.write_str("classical"),
            Self::Ml => f.write_str("ml"),
        }
    }
}

/// Unique identifier for a scanned page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page rotation in quarter turns, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

/// Direction of a single quarter-turn rotation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationDirection {
    Clockwise,
    CounterClockwise,
}

impl Rotation {
    pub fn degrees(&self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Any multiple of 90 (negative allowed), wrapped modulo 360.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Apply one ±90° step, wrapping modulo 360.
    pub fn rotated(&self, direction: RotationDirection) -> Self {
        let step = match direction {
            RotationDirection::Clockwise => 90,
            RotationDirection::CounterClockwise => -90,
        };
        // Always a multiple of 90, so the lookup cannot miss.
        Self::from_degrees(i32::from(self.degrees()) + step).unwrap_or_default()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_degrees(i32::from(value))
            .ok_or_else(|| format!("rotation must be a multiple of 90, got {value}"))
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}
