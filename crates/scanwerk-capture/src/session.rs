// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capture orchestrator — the state machine behind one scanning session.
//
//   Capturing ──capture / stable──▶ Reviewing ──adjust──▶ Adjusting
//       ▲                             │  ▲                    │
//       └────── confirm / retake ─────┘  └──── set_corners ───┘
//
//   Capturing | Reviewing ──finish──▶ Processing ──outcome──▶ Done | Error
//
// Leaving `Capturing` always resets the stabilizer, so a stale lock can never
// trigger a capture in the next round.

use std::fmt;

use scanwerk_bridge::{CaptureSink, FinishedPage, Frame};
use scanwerk_core::config::ScannerConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{CornerSet, DetectionResult, PageId, Rotation, RotationDirection};
use scanwerk_vision::{ImageProcessor, PerspectiveCorrector};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::batch::{PageBatch, ScannedPage};
use crate::stabilizer::{StabilizationState, Stabilizer};

/// Where the session is in the capture flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum SessionState {
    /// Live detection; frames feed the stabilizer.
    Capturing,
    /// Looking at the active page.
    Reviewing,
    /// Editing the active page's corners.
    Adjusting,
    /// Pages handed off; waiting for the assembly outcome.
    Processing,
    Done,
    Error(String),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capturing => f.write_str("capturing"),
            Self::Reviewing => f.write_str("reviewing"),
            Self::Adjusting => f.write_str("adjusting"),
            Self::Processing => f.write_str("processing"),
            Self::Done => f.write_str("done"),
            Self::Error(_) => f.write_str("in error"),
        }
    }
}

/// Result of feeding one frame's detection to the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUpdate {
    pub stability: StabilizationState,
    /// Set when this frame triggered an auto-capture.
    pub captured: Option<PageId>,
}

/// One scanning session: batch, stabilizer and flow state.
pub struct ScanSession {
    state: SessionState,
    batch: PageBatch,
    stabilizer: Stabilizer,
    corrector: PerspectiveCorrector,
    auto_capture: bool,
    progress: Option<String>,
}

impl ScanSession {
    pub fn new(config: &ScannerConfig) -> Self {
        Self {
            state: SessionState::Capturing,
            batch: PageBatch::new(&config.capture),
            stabilizer: Stabilizer::new(&config.stability),
            corrector: PerspectiveCorrector::new(&config.correction),
            auto_capture: config.capture.auto_capture,
            progress: None,
        }
    }

    // -- Queries --------------------------------------------------------------

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn batch(&self) -> &PageBatch {
        &self.batch
    }

    pub fn stability(&self) -> &StabilizationState {
        self.stabilizer.state()
    }

    /// Most recent human-readable progress line while finishing.
    pub fn progress(&self) -> Option<&str> {
        self.progress.as_deref()
    }

    // -- Capturing ------------------------------------------------------------

    /// Merge one frame's detection into the session.
    ///
    /// Results that arrive after the session has left `Capturing` (a slow
    /// detection finishing late) are dropped without error.
    pub fn on_detection(&mut self, frame: &Frame, result: DetectionResult) -> FrameUpdate {
        if self.state != SessionState::Capturing {
            debug!(state = %self.state, "late detection ignored");
            return FrameUpdate {
                stability: *self.stabilizer.state(),
                captured: None,
            };
        }

        let stability = self.stabilizer.update(&result, frame.timestamp_ms);

        let mut captured = None;
        if stability.became_stable && self.auto_capture {
            captured = self.capture_with(frame, stability.filtered_corners);
            if captured.is_some() {
                info!(timestamp_ms = frame.timestamp_ms, "Auto-capture on stable outline");
            }
        }
        FrameUpdate { stability, captured }
    }

    /// Capture `frame` on explicit user action, using the current smoothed
    /// outline if the stabilizer holds a lock.
    ///
    /// A missing or low-confidence last detection drops the lock, so the page
    /// is then captured without corners.
    ///
    /// A full batch turns this into a no-op (`Ok(None)`) and the session
    /// stays in `Capturing`.
    #[instrument(skip_all, fields(timestamp_ms = frame.timestamp_ms))]
    pub fn capture(&mut self, frame: &Frame) -> Result<Option<PageId>> {
        self.require(&[SessionState::Capturing], "capture")?;
        let corners = self.stabilizer.state().filtered_corners;
        Ok(self.capture_with(frame, corners))
    }

    fn capture_with(&mut self, frame: &Frame, corners: Option<CornerSet>) -> Option<PageId> {
        let id = self.batch.add(frame.image.clone(), corners)?;
        self.transition(SessionState::Reviewing);
        Some(id)
    }

    /// The camera loop stopped while capturing: drop the outline lock so the
    /// next loop starts a fresh stability window. Batch and state are kept.
    pub fn stop_capturing(&mut self) {
        if self.state == SessionState::Capturing {
            debug!("camera loop stopped, stabilizer reset");
            self.stabilizer.reset();
        }
    }

    // -- Reviewing / adjusting ------------------------------------------------

    /// Rotate the active page by a quarter turn.
    pub fn rotate(&mut self, direction: RotationDirection) -> Result<Rotation> {
        self.require(&[SessionState::Reviewing, SessionState::Adjusting], "rotate")?;
        let index = self.batch.active_index();
        self.batch.rotate(index, direction)
    }

    /// Discard the active page and go back to the camera.
    pub fn retake(&mut self) -> Result<()> {
        self.require(&[SessionState::Reviewing, SessionState::Adjusting], "retake")?;
        let index = self.batch.active_index();
        if !self.batch.is_empty() {
            self.batch.remove(index)?;
        }
        self.transition(SessionState::Capturing);
        Ok(())
    }

    /// Keep the active page and go back to the camera for the next one.
    pub fn confirm(&mut self) -> Result<()> {
        self.require(&[SessionState::Reviewing], "confirm")?;
        self.transition(SessionState::Capturing);
        Ok(())
    }

    /// Start manual corner adjustment on the active page.
    pub fn adjust(&mut self) -> Result<()> {
        self.require(&[SessionState::Reviewing], "adjust corners")?;
        if self.batch.is_empty() {
            return Err(ScanwerkError::NoPages);
        }
        self.transition(SessionState::Adjusting);
        Ok(())
    }

    /// Store adjusted corners on the active page and return to review.
    pub fn set_corners(&mut self, corners: CornerSet) -> Result<()> {
        self.require(&[SessionState::Adjusting], "set corners")?;
        let index = self.batch.active_index();
        self.batch.update_corners(index, corners)?;
        self.transition(SessionState::Reviewing);
        Ok(())
    }

    /// Open a page from the batch strip for review.
    pub fn select_page(&mut self, index: usize) -> Result<()> {
        self.require(&[SessionState::Capturing, SessionState::Reviewing], "select a page")?;
        self.batch.set_active(index)?;
        self.transition(SessionState::Reviewing);
        Ok(())
    }

    /// Drop a page from the batch. Reviewing an emptied batch falls back to
    /// the camera.
    pub fn remove_page(&mut self, index: usize) -> Result<ScannedPage> {
        self.require(&[SessionState::Capturing, SessionState::Reviewing], "remove a page")?;
        let page = self.batch.remove(index)?;
        if self.batch.is_empty() && self.state == SessionState::Reviewing {
            self.transition(SessionState::Capturing);
        }
        Ok(page)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        self.require(&[SessionState::Capturing, SessionState::Reviewing], "reorder pages")?;
        self.batch.reorder(from, to)
    }

    // -- Finishing ------------------------------------------------------------

    /// Hand over the batch: every page is de-skewed with its corners and then
    /// rotated, in batch order. The batch is emptied and the session moves to
    /// `Processing` until [`report_outcome`](Self::report_outcome).
    pub fn finish(&mut self) -> Result<Vec<FinishedPage>> {
        self.finish_with_progress(|_| {})
    }

    /// [`finish`](Self::finish) with a callback receiving each progress line.
    #[instrument(skip_all, fields(pages = self.batch.len()))]
    pub fn finish_with_progress(&mut self, mut report: impl FnMut(&str)) -> Result<Vec<FinishedPage>> {
        self.require(&[SessionState::Capturing, SessionState::Reviewing], "finish")?;
        if self.batch.is_empty() {
            return Err(ScanwerkError::NoPages);
        }

        self.transition(SessionState::Processing);
        let pages = self.batch.take_all();
        let total = pages.len();
        let mut finished = Vec::with_capacity(total);

        for (index, page) in pages.into_iter().enumerate() {
            let line = format!("Preparing page {}/{}", index + 1, total);
            report(&line);
            self.progress = Some(line);
            finished.push(self.finish_page(index, page));
        }

        let corrected = finished.iter().filter(|p| p.corrected).count();
        info!(pages = total, corrected, "Batch finished");
        self.progress = Some(format!("{total} pages ready"));
        Ok(finished)
    }

    fn finish_page(&self, index: usize, page: ScannedPage) -> FinishedPage {
        let (image, corrected) = match page.corners() {
            Some(corners) => match self.corrector.correct(page.raw(), corners.points()) {
                Ok(image) => (image, true),
                Err(err) => {
                    warn!(page = %page.id(), error = %err, "perspective correction failed, using raw capture");
                    (page.raw().as_ref().clone(), false)
                }
            },
            None => (page.raw().as_ref().clone(), false),
        };

        let rotation = page.rotation();
        FinishedPage {
            id: page.id(),
            index,
            image: ImageProcessor::from_rgba(image).rotate(rotation).into_rgba(),
            rotation,
            corrected,
        }
    }

    /// Record how the assembly collaborator fared with the finished pages.
    pub fn report_outcome(&mut self, outcome: std::result::Result<(), String>) -> Result<()> {
        self.require(&[SessionState::Processing], "report an outcome")?;
        match outcome {
            Ok(()) => {
                info!("Scan session done");
                self.progress = None;
                self.transition(SessionState::Done);
            }
            Err(message) => {
                warn!(error = %message, "Scan session failed downstream");
                self.progress = Some(message.clone());
                self.transition(SessionState::Error(message));
            }
        }
        Ok(())
    }

    /// Finish, deliver to `sink`, and record the sink's outcome.
    ///
    /// Returns the number of pages delivered. A sink failure moves the
    /// session to `Error` and is returned to the caller.
    pub fn finish_into(&mut self, sink: &mut dyn CaptureSink) -> Result<usize> {
        let pages = self.finish()?;
        let count = pages.len();
        match sink.deliver(pages) {
            Ok(()) => {
                self.report_outcome(Ok(()))?;
                Ok(count)
            }
            Err(err) => {
                self.report_outcome(Err(err.to_string()))?;
                Err(err)
            }
        }
    }

    /// Drop the batch and start over from the camera. Valid in any state.
    pub fn cancel(&mut self) {
        info!(state = %self.state, discarded = self.batch.len(), "Scan session reset");
        self.batch.clear();
        self.stabilizer.reset();
        self.progress = None;
        self.state = SessionState::Capturing;
    }

    // -- Internals ------------------------------------------------------------

    fn require(&self, allowed: &[SessionState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ScanwerkError::InvalidTransition {
                state: self.state.to_string(),
                action,
            })
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == SessionState::Capturing && next != SessionState::Capturing {
            self.stabilizer.reset();
        }
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }
}
