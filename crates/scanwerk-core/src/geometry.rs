// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Geometry kernel — polygon area, convex hull, Ramer–Douglas–Peucker
// simplification, quadrilateral extraction and validation, corner ordering.
//
// Pure and deterministic. Functions accept points in whatever space the
// caller works in (pixel or normalized); only `validate_quadrilateral` cares,
// because its absolute minimum area is expressed in pixels.

use std::cmp::Ordering;

use thiserror::Error;

use crate::types::{CornerSet, Point};

/// Recursion cap for [`simplify_polygon`]. See the note on that function.
const MAX_SIMPLIFY_DEPTH: usize = 64;

// -- Area and perimeter -------------------------------------------------------

/// Signed shoelace area.
///
/// Positive when the vertices run clockwise on screen (y pointing down),
/// negative for the opposite winding. Take `abs()` for the magnitude.
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    twice_area / 2.0
}

/// Length of the polyline through `points`, including the closing edge when
/// `closed` is set.
pub fn perimeter(points: &[Point], closed: bool) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let open: f64 = points.windows(2).map(|w| w[0].distance_to(&w[1])).sum();
    if closed {
        open + points[points.len() - 1].distance_to(&points[0])
    } else {
        open
    }
}

/// Axis-aligned bounding box as `(min, max)` corners.
pub fn bounding_box(points: &[Point]) -> Option<(Point, Point)> {
    let first = points.first()?;
    let mut min = *first;
    let mut max = *first;
    for p in &points[1..] {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Some((min, max))
}

/// Z component of `(a - o) × (b - o)`.
fn cross(o: &Point, a: &Point, b: &Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

// -- Convex hull --------------------------------------------------------------

/// Andrew's monotone chain convex hull.
///
/// The hull is returned counter-clockwise in the mathematical (y-up) sense,
/// i.e. with positive signed area; on screen that reads clockwise. Collinear
/// points on hull edges are dropped. Inputs with fewer than three points are
/// returned unchanged and the caller must handle that degenerate case.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    sorted.dedup();
    if sorted.len() < 3 {
        return sorted;
    }

    let mut hull: Vec<Point> = Vec::with_capacity(sorted.len() + 1);

    // Lower hull.
    for p in &sorted {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }

    // Upper hull.
    let lower_len = hull.len() + 1;
    for p in sorted.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(*p);
    }

    // The last point repeats the first.
    hull.pop();
    hull
}

// -- Polygon simplification ---------------------------------------------------

/// Perpendicular distance from `p` to the line through `a` and `b`.
fn perpendicular_distance(p: &Point, a: &Point, b: &Point) -> f64 {
    let len = a.distance_to(b);
    if len == 0.0 {
        return p.distance_to(a);
    }
    cross(a, b, p).abs() / len
}

/// Recursive Ramer–Douglas–Peucker simplification of an open polyline.
///
/// The first and last points are always kept. Contours with fewer than three
/// points, or a non-positive `epsilon`, pass through unchanged.
///
/// `epsilon` is expected to scale with the contour perimeter (≈2%, see
/// [`adaptive_epsilon`]) so results do not depend on resolution. That
/// relationship also bounds the recursion: a call only recurses when some
/// vertex lies more than `epsilon` off the chord, so every recursing
/// sub-path is at least `2 * epsilon` long and sibling sub-paths are
/// disjoint. Depth therefore stays below `perimeter / (2 * epsilon)`, about
/// 25 levels at 2%, whatever the number of input points. A segment that hits
/// `MAX_SIMPLIFY_DEPTH` is kept as is.
pub fn simplify_polygon(contour: &[Point], epsilon: f64) -> Vec<Point> {
    if contour.len() < 3 || !(epsilon > 0.0) {
        return contour.to_vec();
    }
    douglas_peucker(contour, epsilon, 0)
}

fn douglas_peucker(points: &[Point], epsilon: f64, depth: usize) -> Vec<Point> {
    let last = points.len() - 1;
    if points.len() < 3 {
        return points.to_vec();
    }
    if depth >= MAX_SIMPLIFY_DEPTH {
        return points.to_vec();
    }

    let (split, max_dist) = points[1..last]
        .iter()
        .enumerate()
        .map(|(i, p)| (i + 1, perpendicular_distance(p, &points[0], &points[last])))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if max_dist > epsilon {
        let mut left = douglas_peucker(&points[..=split], epsilon, depth + 1);
        let right = douglas_peucker(&points[split..], epsilon, depth + 1);
        // `split` is shared by both halves.
        left.pop();
        left.extend(right);
        left
    } else {
        vec![points[0], points[last]]
    }
}

/// Simplify a closed contour (no repeated start point) and return the
/// remaining vertices, again without a repeated start point.
///
/// The contour is cut at its first point and at the vertex farthest from it,
/// both halves are simplified, and the first point is then dropped again if
/// it turned out to lie on a straight edge.
pub fn simplify_closed_contour(contour: &[Point], epsilon: f64) -> Vec<Point> {
    if contour.len() < 3 {
        return contour.to_vec();
    }
    let anchor = contour[0];
    let far = contour
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.distance_to(&anchor).total_cmp(&b.1.distance_to(&anchor)))
        .map(|(i, _)| i)
        .unwrap_or(0);
    if far == 0 {
        return vec![anchor];
    }

    let first_half = simplify_polygon(&contour[..=far], epsilon);
    let mut second: Vec<Point> = contour[far..].to_vec();
    second.push(anchor);
    let second_half = simplify_polygon(&second, epsilon);

    let mut vertices = first_half;
    // Drop the shared far vertex, then the repeated anchor at the end.
    vertices.pop();
    vertices.extend(second_half);
    vertices.pop();

    // Both halves keep the anchor; drop it if it sits on a straight run.
    if vertices.len() > 3 {
        let prev = vertices[vertices.len() - 1];
        let next = vertices[1];
        if perpendicular_distance(&vertices[0], &prev, &next) <= epsilon {
            vertices.remove(0);
        }
    }
    vertices
}

/// RDP tolerance for a closed contour: `fraction` of its perimeter.
pub fn adaptive_epsilon(contour: &[Point], fraction: f64) -> f64 {
    perimeter(contour, true) * fraction
}

// -- Corner extraction and ordering --------------------------------------------

/// Index of the extreme point by `key`, ties broken by the coordinates so the
/// pick depends only on the point values, never on their input order.
fn extreme_index(points: &[Point], key: impl Fn(&Point) -> f64, want_max: bool) -> Option<usize> {
    let cmp = |a: &Point, b: &Point| {
        key(a)
            .total_cmp(&key(b))
            .then(a.x.total_cmp(&b.x))
            .then(a.y.total_cmp(&b.y))
    };
    (0..points.len()).reduce(|best, i| {
        let ord = cmp(&points[i], &points[best]);
        let better = if want_max { ord == Ordering::Greater } else { ord == Ordering::Less };
        if better { i } else { best }
    })
}

/// Indices of the TL, TR, BR, BL extremes: min/max of `x + y` and `x − y`.
fn diagonal_extremes(points: &[Point]) -> Option<[usize; 4]> {
    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.x - p.y;
    Some([
        extreme_index(points, sum, false)?,
        extreme_index(points, diff, true)?,
        extreme_index(points, sum, true)?,
        extreme_index(points, diff, false)?,
    ])
}

fn all_distinct(indices: &[usize; 4]) -> bool {
    (0..4).all(|i| (i + 1..4).all(|j| indices[i] != indices[j]))
}

/// Order four points top-left, top-right, bottom-right, bottom-left.
///
/// Each point is classified by its `x + y` and `x − y` rank. When those ranks
/// collide (e.g. a square rotated by 45°) or do not describe a convex
/// clockwise outline, the points are instead sorted by angle around their
/// centroid and rotated so the smallest `x + y` comes first. Both paths look
/// only at point values, so applying this twice gives the same result.
pub fn order_corners_cw(points: [Point; 4]) -> [Point; 4] {
    if let Some(idx) = diagonal_extremes(&points) {
        if all_distinct(&idx) {
            let ordered = idx.map(|i| points[i]);
            if is_convex_clockwise(&ordered) {
                return ordered;
            }
        }
    }
    order_by_angle(points)
}

fn order_by_angle(points: [Point; 4]) -> [Point; 4] {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

    let mut sorted = points;
    // In image coordinates ascending atan2 sweeps clockwise on screen.
    sorted.sort_by(|a, b| {
        (a.y - cy)
            .atan2(a.x - cx)
            .total_cmp(&(b.y - cy).atan2(b.x - cx))
            .then(a.x.total_cmp(&b.x))
            .then(a.y.total_cmp(&b.y))
    });

    let start = extreme_index(&sorted, |p| p.x + p.y, false).unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

/// All turns have the same, clockwise-on-screen sign.
fn is_convex_clockwise(points: &[Point; 4]) -> bool {
    (0..4).all(|i| {
        let prev = &points[(i + 3) % 4];
        let curr = &points[i];
        let next = &points[(i + 1) % 4];
        cross(prev, curr, next) > 0.0
    })
}

/// Reduce a convex hull to a quadrilateral.
///
/// Exactly four hull points are used as-is. Larger hulls keep the points that
/// are extremal in the four diagonal directions (min/max of `x + y` and
/// `x − y`). Returns `None` for fewer than four points or when the extremes do
/// not name four distinct points (degenerate or near-collinear hull).
pub fn quad_from_hull(hull: &[Point]) -> Option<CornerSet> {
    match hull.len() {
        0..=3 => None,
        4 => {
            let mut distinct = hull.to_vec();
            distinct.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
            distinct.dedup();
            if distinct.len() == 4 {
                CornerSet::from_slice(hull)
            } else {
                None
            }
        }
        _ => {
            let idx = diagonal_extremes(hull)?;
            if !all_distinct(&idx) {
                return None;
            }
            Some(CornerSet::from_points(idx.map(|i| hull[i])))
        }
    }
}

// -- Quadrilateral validation ---------------------------------------------------

/// Acceptance window for candidate document outlines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadConstraints {
    /// Smallest allowed internal angle, degrees.
    pub min_angle_deg: f64,
    /// Largest allowed internal angle, degrees.
    pub max_angle_deg: f64,
    /// Absolute floor on area, in the caller's pixel units.
    pub min_area_px: f64,
    /// Smallest fraction of the frame the quad may cover.
    pub min_area_ratio: f64,
    /// Largest fraction of the frame the quad may cover.
    pub max_area_ratio: f64,
    /// Longest-to-shortest mean side ratio beyond which the shape is a sliver.
    pub max_aspect: f64,
}

impl Default for QuadConstraints {
    fn default() -> Self {
        Self {
            min_angle_deg: 40.0,
            max_angle_deg: 140.0,
            min_area_px: 100.0,
            min_area_ratio: 0.05,
            max_area_ratio: 0.95,
            max_aspect: 3.5,
        }
    }
}

impl QuadConstraints {
    /// Default angle/area limits with a custom frame-coverage window.
    pub fn with_area_ratio(min_area_ratio: f64, max_area_ratio: f64) -> Self {
        Self {
            min_area_ratio,
            max_area_ratio,
            ..Self::default()
        }
    }
}

/// Why a candidate quadrilateral was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum QuadRejection {
    #[error("expected 4 vertices, got {0}")]
    VertexCount(usize),
    #[error("vertices are not finite")]
    NonFinite,
    #[error("outline is not convex or winds inconsistently")]
    NotConvex,
    #[error("internal angle {degrees:.1}° at vertex {vertex} is out of range")]
    Angle { vertex: usize, degrees: f64 },
    #[error("area {area:.1}px² is degenerate")]
    Degenerate { area: f64 },
    #[error("covers {ratio:.3} of the frame")]
    AreaRatio { ratio: f64 },
    #[error("side ratio {ratio:.2} is too extreme")]
    Aspect { ratio: f64 },
}

/// Internal angle at `curr`, degrees in `[0, 180]`.
fn internal_angle(prev: &Point, curr: &Point, next: &Point) -> f64 {
    let (v1x, v1y) = (prev.x - curr.x, prev.y - curr.y);
    let (v2x, v2y) = (next.x - curr.x, next.y - curr.y);
    let dot = v1x * v2x + v1y * v2y;
    let cross = v1x * v2y - v1y * v2x;
    cross.abs().atan2(dot).to_degrees()
}

/// Check a candidate quadrilateral (pixel space) against `constraints`.
///
/// `image_area` is the frame area in the same pixel units. This is the single
/// gate both detectors pass before reporting corners.
pub fn validate_quadrilateral(
    points: &[Point],
    image_area: f64,
    constraints: &QuadConstraints,
) -> Result<(), QuadRejection> {
    if points.len() != 4 {
        return Err(QuadRejection::VertexCount(points.len()));
    }
    if !points.iter().all(Point::is_finite) {
        return Err(QuadRejection::NonFinite);
    }

    // Consistent winding: every turn must have the same non-zero sign.
    let turns: Vec<f64> = (0..4)
        .map(|i| cross(&points[(i + 3) % 4], &points[i], &points[(i + 1) % 4]))
        .collect();
    let all_pos = turns.iter().all(|&t| t > 0.0);
    let all_neg = turns.iter().all(|&t| t < 0.0);
    if !(all_pos || all_neg) {
        return Err(QuadRejection::NotConvex);
    }

    for i in 0..4 {
        let degrees = internal_angle(&points[(i + 3) % 4], &points[i], &points[(i + 1) % 4]);
        if degrees < constraints.min_angle_deg || degrees > constraints.max_angle_deg {
            return Err(QuadRejection::Angle { vertex: i, degrees });
        }
    }

    let area = polygon_area(points).abs();
    if area < constraints.min_area_px {
        return Err(QuadRejection::Degenerate { area });
    }
    if image_area > 0.0 {
        let ratio = area / image_area;
        if ratio < constraints.min_area_ratio || ratio > constraints.max_area_ratio {
            return Err(QuadRejection::AreaRatio { ratio });
        }
    }

    let horizontal = (points[0].distance_to(&points[1]) + points[3].distance_to(&points[2])) / 2.0;
    let vertical = (points[0].distance_to(&points[3]) + points[1].distance_to(&points[2])) / 2.0;
    let (long, short) = if horizontal >= vertical {
        (horizontal, vertical)
    } else {
        (vertical, horizontal)
    };
    if short <= 0.0 || long / short > constraints.max_aspect {
        return Err(QuadRejection::Aspect {
            ratio: if short > 0.0 { long / short } else { f64::INFINITY },
        });
    }

    Ok(())
}

/// [`validate_quadrilateral`] with the default constraints, as a boolean.
pub fn is_valid_quadrilateral(points: &[Point], image_area: f64) -> bool {
    validate_quadrilateral(points, image_area, &QuadConstraints::default()).is_ok()
}
