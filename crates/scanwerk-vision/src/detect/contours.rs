// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Moore-neighbourhood contour tracing over a binary edge map.
//
// A trace starts at every foreground pixel that has background (or the image
// border) to its west and has not been claimed by an earlier trace. Tracing
// stops when the walk is back at its starting pixel and about to repeat its
// first move again, so thin one-pixel lines are walked in both directions
// instead of ending early.

use super::scratch::ContourSet;

/// 8-neighbour offsets, clockwise on screen starting east.
const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Direction index of the west neighbour.
const WEST: usize = 4;

/// Contours shorter than this are noise.
pub const MIN_CONTOUR_POINTS: usize = 8;

/// Trace every outer border in `binary` into `out`.
///
/// `visited` must be the same size as `binary`. It is reset here and left
/// marking every pixel that belongs to a traced contour.
pub fn trace_contours(binary: &[u8], visited: &mut [u8], width: usize, height: usize, out: &mut ContourSet) {
    visited.fill(0);
    out.clear();

    for y in 0..height {
        let row = y * width;
        for x in 0..width {
            let i = row + x;
            if binary[i] == 0 || visited[i] != 0 {
                continue;
            }
            if x > 0 && binary[i - 1] != 0 {
                continue;
            }

            let start = out.begin();
            follow_border(binary, visited, width, height, (x, y), out);
            if out.begin() - start >= MIN_CONTOUR_POINTS {
                out.finish(start);
            } else {
                out.discard(start);
            }
        }
    }
}

/// Walk one closed border clockwise starting at `p0`, entering from the west.
///
/// The walk ends when it is back at `p0` about to repeat its first move,
/// which also terminates on one-pixel-wide lines that are walked out and back.
fn follow_border(
    binary: &[u8],
    visited: &mut [u8],
    width: usize,
    height: usize,
    p0: (usize, usize),
    out: &mut ContourSet,
) {
    let mut claim = |p: (usize, usize), out: &mut ContourSet| {
        visited[p.1 * width + p.0] = 1;
        out.push_point(p.0, p.1);
    };

    claim(p0, out);
    let Some(first) = step(binary, width, height, p0, WEST) else {
        // Isolated pixel.
        return;
    };

    // Every pixel can be entered from at most 8 directions.
    let max_steps = 8 * width * height;
    let mut current = first;
    for _ in 0..max_steps {
        let (p, back) = current;
        // `p` was reached from a foreground pixel, so a next step exists.
        let Some(next) = step(binary, width, height, p, back) else {
            return;
        };
        if p == p0 && next == first {
            return;
        }
        claim(p, out);
        current = next;
    }
}

/// One Moore step: scan clockwise from the backtrack direction `back` for the
/// next foreground neighbour of `p`. Returns that pixel and its backtrack
/// direction (the background neighbour checked just before it).
fn step(
    binary: &[u8],
    width: usize,
    height: usize,
    p: (usize, usize),
    back: usize,
) -> Option<((usize, usize), usize)> {
    let fg = |x: i32, y: i32| -> bool {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && binary[y as usize * width + x as usize] != 0
    };

    for s in 1..=8 {
        let d = (back + s) % 8;
        let nx = p.0 as i32 + NEIGHBOURS[d].0;
        let ny = p.1 as i32 + NEIGHBOURS[d].1;
        if fg(nx, ny) {
            let prev = (d + 7) % 8;
            let bx = p.0 as i32 + NEIGHBOURS[prev].0 - nx;
            let by = p.1 as i32 + NEIGHBOURS[prev].1 - ny;
            let new_back = NEIGHBOURS
                .iter()
                .position(|&(dx, dy)| dx == bx && dy == by)
                .unwrap_or(WEST);
            return Some(((nx as usize, ny as usize), new_back));
        }
    }
    None
}
