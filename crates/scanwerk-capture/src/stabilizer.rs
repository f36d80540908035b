// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Temporal stabilizer — smooths per-frame corner detections and decides when
// the outline has held still long enough to capture.
//
// Each of the eight corner coordinates runs through its own One-Euro filter:
// a low-pass filter whose cutoff rises with the estimated speed, so a resting
// outline is smoothed heavily while a moving one is tracked with little lag.
//
// Stability is measured against an anchor: the filtered corners at the start
// of the current episode. Any filtered corner drifting more than the jitter
// tolerance from its anchor breaks the episode and starts a new one.

use std::f64::consts::TAU;

use scanwerk_core::config::StabilityConfig;
use scanwerk_core::types::{CornerSet, DetectionResult, Point};
use serde::Serialize;
use tracing::{debug, trace};

/// Time step assumed when two samples share a timestamp (or go backwards).
const FALLBACK_DT_S: f64 = 1.0 / 30.0;

// -- One-Euro filter ----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    /// Last filtered value and its timestamp; `None` until the first sample.
    prev: Option<(f64, f64)>,
    /// Filtered derivative.
    dx: f64,
}

impl OneEuroFilter {
    fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            prev: None,
            dx: 0.0,
        }
    }

    /// Smoothing factor of a first-order low-pass at `cutoff` Hz over `dt` s.
    fn alpha(cutoff: f64, dt: f64) -> f64 {
        let tau = 1.0 / (TAU * cutoff.max(f64::EPSILON));
        1.0 / (1.0 + tau / dt)
    }

    fn filter(&mut self, x: f64, timestamp_ms: f64) -> f64 {
        let Some((prev_x, prev_t)) = self.prev else {
            self.prev = Some((x, timestamp_ms));
            self.dx = 0.0;
            return x;
        };

        let dt = (timestamp_ms - prev_t) / 1000.0;
        let dt = if dt > 0.0 { dt } else { FALLBACK_DT_S };

        let raw_dx = (x - prev_x) / dt;
        self.dx += Self::alpha(self.d_cutoff, dt) * (raw_dx - self.dx);

        let cutoff = self.min_cutoff + self.beta * self.dx.abs();
        let filtered = prev_x + Self::alpha(cutoff, dt) * (x - prev_x);
        self.prev = Some((filtered, timestamp_ms.max(prev_t)));
        filtered
    }

    fn reset(&mut self) {
        self.prev = None;
        self.dx = 0.0;
    }
}

// -- Stabilizer ---------------------------------------------------------------

/// What the stabilizer reports after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StabilizationState {
    /// Smoothed outline, `None` while no document is locked.
    pub filtered_corners: Option<CornerSet>,
    pub is_stable: bool,
    /// Elapsed stable time over the required duration, in `[0, 1]`.
    pub progress: f64,
    /// Timestamp of the frame that produced this state.
    pub last_update_ms: Option<f64>,
    /// `true` only on the frame where the current episode first became
    /// stable. Auto-capture keys off this, not `is_stable`.
    pub became_stable: bool,
    /// Episodes broken by movement since the outline was last stable.
    pub stability_breaks: u32,
}

/// Per-session corner smoother and stability detector.
///
/// Touched only by the detection loop; not shared between threads.
pub struct Stabilizer {
    filters: [OneEuroFilter; 8],
    duration_ms: f64,
    jitter_tolerance: f64,
    min_confidence: f64,
    anchor: Option<CornerSet>,
    episode_start_ms: Option<f64>,
    fired: bool,
    breaks: u32,
    state: StabilizationState,
}

impl Default for Stabilizer {
    fn default() -> Self {
        Self::new(&StabilityConfig::default())
    }
}

impl Stabilizer {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            filters: [OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff); 8],
            duration_ms: config.duration_ms as f64,
            jitter_tolerance: config.jitter_tolerance,
            min_confidence: config.min_confidence,
            anchor: None,
            episode_start_ms: None,
            fired: false,
            breaks: 0,
            state: StabilizationState::default(),
        }
    }

    /// The state reported by the most recent `update`.
    pub fn state(&self) -> &StabilizationState {
        &self.state
    }

    /// Feed one frame's detection.
    ///
    /// A missing or low-confidence detection drops the lock: filters, anchor
    /// and progress all reset, so nothing is carried across a gap.
    pub fn update(&mut self, result: &DetectionResult, timestamp_ms: f64) -> StabilizationState {
        let corners = result
            .corners
            .filter(|_| result.confidence >= self.min_confidence);

        let Some(corners) = corners else {
            if self.anchor.is_some() {
                debug!(timestamp_ms, "detection lost, stabilizer reset");
            }
            self.lose_lock();
            self.state = StabilizationState {
                last_update_ms: Some(timestamp_ms),
                stability_breaks: self.breaks,
                ..StabilizationState::default()
            };
            return self.state;
        };

        let filtered = self.smooth(&corners, timestamp_ms);

        match self.anchor {
            None => self.start_episode(filtered, timestamp_ms),
            Some(anchor) => {
                let drift = filtered.max_displacement(&anchor);
                if drift > self.jitter_tolerance {
                    self.breaks += 1;
                    trace!(drift, breaks = self.breaks, "stability broken");
                    self.start_episode(filtered, timestamp_ms);
                }
            }
        }

        let elapsed = self
            .episode_start_ms
            .map_or(0.0, |start| (timestamp_ms - start).max(0.0));
        let progress = if self.duration_ms <= 0.0 {
            1.0
        } else {
            (elapsed / self.duration_ms).clamp(0.0, 1.0)
        };
        let is_stable = progress >= 1.0;
        let became_stable = is_stable && !self.fired;
        if became_stable {
            self.fired = true;
            self.breaks = 0;
            debug!(timestamp_ms, "outline stable");
        }

        self.state = StabilizationState {
            filtered_corners: Some(filtered),
            is_stable,
            progress,
            last_update_ms: Some(timestamp_ms),
            became_stable,
            stability_breaks: self.breaks,
        };
        self.state
    }

    /// Forget everything, including the break count. Called when the camera
    /// loop stops.
    pub fn reset(&mut self) {
        self.lose_lock();
        self.breaks = 0;
        self.state = StabilizationState::default();
    }

    fn smooth(&mut self, corners: &CornerSet, timestamp_ms: f64) -> CornerSet {
        let mut out = *corners.points();
        for (i, point) in out.iter_mut().enumerate() {
            let x = self.filters[2 * i].filter(point.x, timestamp_ms);
            let y = self.filters[2 * i + 1].filter(point.y, timestamp_ms);
            *point = Point::new(x, y);
        }
        CornerSet::from_points(out)
    }

    fn start_episode(&mut self, anchor: CornerSet, timestamp_ms: f64) {
        self.anchor = Some(anchor);
        self.episode_start_ms = Some(timestamp_ms);
        self.fired = false;
    }

    fn lose_lock(&mut self) {
        self.filters.iter_mut().for_each(OneEuroFilter::reset);
        self.anchor = None;
        self.episode_start_ms = None;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: f64 = 50.0;

    fn quad(offset: f64) -> DetectionResult {
        DetectionResult::found(
            CornerSet::from_points([
                Point::new(0.2 + offset, 0.2),
                Point::new(0.8 + offset, 0.2),
                Point::new(0.8 + offset, 0.8),
                Point::new(0.2 + offset, 0.8),
            ]),
            0.9,
        )
    }

    #[test]
    fn steady_stream_fires_exactly_once() {
        let mut stabilizer = Stabilizer::default();
        let mut fired = Vec::new();
        for i in 0..60 {
            let t = i as f64 * FRAME_MS;
            let state = stabilizer.update(&quad(0.0), t);
            if state.became_stable {
                fired.push(t);
            }
        }
        assert_eq!(fired, vec![1500.0]);
        assert!(stabilizer.state().is_stable);
        assert_eq!(stabilizer.state().progress, 1.0);
    }

    #[test]
    fn progress_grows_linearly() {
        let mut stabilizer = Stabilizer::default();
        stabilizer.update(&quad(0.0), 0.0);
        let state = stabilizer.update(&quad(0.0), 750.0);
        assert!((state.progress - 0.5).abs() < 1e-9);
        assert!(!state.is_stable);
    }

    #[test]
    fn jump_resets_progress() {
        let mut stabilizer = Stabilizer::default();
        for i in 0..20 {
            stabilizer.update(&quad(0.0), i as f64 * FRAME_MS);
        }
        assert!(stabilizer.state().progress > 0.5);

        let state = stabilizer.update(&quad(0.15), 20.0 * FRAME_MS);
        assert_eq!(state.progress, 0.0);
        assert!(!state.is_stable);
        assert_eq!(state.stability_breaks, 1);
    }

    #[test]
    fn small_jitter_is_tolerated() {
        let mut stabilizer = Stabilizer::default();
        let mut fired = 0;
        for i in 0..40 {
            // ±0.004 alternating, well inside the 0.02 tolerance.
            let wobble = if i % 2 == 0 { 0.004 } else { -0.004 };
            if stabilizer.update(&quad(wobble), i as f64 * FRAME_MS).became_stable {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn loss_resets_the_lock() {
        let mut stabilizer = Stabilizer::default();
        for i in 0..40 {
            stabilizer.update(&quad(0.0), i as f64 * FRAME_MS);
        }
        assert!(stabilizer.state().is_stable);

        let lost = stabilizer.update(&DetectionResult::none(), 2000.0);
        assert_eq!(lost.filtered_corners, None);
        assert_eq!(lost.progress, 0.0);
        assert!(!lost.is_stable);

        // A fresh episode fires again after another full window.
        let mut fired = Vec::new();
        for i in 0..40 {
            let t = 2050.0 + i as f64 * FRAME_MS;
            if stabilizer.update(&quad(0.0), t).became_stable {
                fired.push(t);
            }
        }
        assert_eq!(fired, vec![3550.0]);
    }

    #[test]
    fn low_confidence_counts_as_lost() {
        let mut stabilizer = Stabilizer::default();
        let weak = DetectionResult::found(*quad(0.0).corners.as_ref().unwrap(), 0.2);
        let state = stabilizer.update(&weak, 0.0);
        assert_eq!(state.filtered_corners, None);
    }

    #[test]
    fn filter_tracks_a_moved_document() {
        let mut stabilizer = Stabilizer::default();
        for i in 0..10 {
            stabilizer.update(&quad(0.0), i as f64 * FRAME_MS);
        }
        let mut last = None;
        for i in 10..40 {
            last = stabilizer.update(&quad(0.1), i as f64 * FRAME_MS).filtered_corners;
        }
        let tl = last.unwrap().top_left();
        assert!((tl.x - 0.3).abs() < 0.005, "filtered x {}", tl.x);
    }

    #[test]
    fn reset_clears_breaks() {
        let mut stabilizer = Stabilizer::default();
        stabilizer.update(&quad(0.0), 0.0);
        stabilizer.update(&quad(0.2), 50.0);
        assert_eq!(stabilizer.state().stability_breaks, 1);
        stabilizer.reset();
        assert_eq!(*stabilizer.state(), StabilizationState::default());
    }
}
