// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User-facing scan guidance.
//
// The live view shows at most one short hint per frame ("hold still", "don't
// move", ...). Errors that reach the user are mapped to a plain-English
// message with a suggestion, using a small severity taxonomy that drives UI
// presentation. Wording is English; the UI shell may translate by variant.

use serde::{Deserialize, Serialize};

use crate::error::ScanwerkError;

/// How long the frame may be empty before nudging the user.
pub const NO_DETECTION_HINT_MS: f64 = 3000.0;

/// Stability breaks after which the user is told to hold still.
pub const STABILITY_BREAKS_BEFORE_HINT: u32 = 3;

/// Progress beyond which the user is told not to move.
pub const PROGRESS_HINT_THRESHOLD: f64 = 0.1;

// -- Live-view hints ---------------------------------------------------------

/// One-line guidance for the live camera view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanHint {
    /// Nothing detected for a while.
    HoldInFrame,
    /// The outline keeps jumping.
    HoldStill,
    /// Stability timer is running.
    DontMove,
    /// Stable; auto-capture is (about to be) triggered.
    DocumentDetected,
    /// Detection gave up after repeated failures.
    CaptureManually,
    /// The batch is full; further captures are ignored.
    BatchFull,
}

impl ScanHint {
    pub fn message(&self) -> &'static str {
        match self {
            Self::HoldInFrame => "Hold the document in frame",
            Self::HoldStill => "Hold still",
            Self::DontMove => "Don't move…",
            Self::DocumentDetected => "Document detected",
            Self::CaptureManually => "Detection unavailable, please capture manually",
            Self::BatchFull => "Page limit reached",
        }
    }
}

impl std::fmt::Display for ScanHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Snapshot of the detection loop used to pick a hint.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HintContext {
    /// Detection has been switched off for this session.
    pub detection_disabled: bool,
    /// Time since the last detection (or since the loop started, if there
    /// was none). `None` while a document is currently detected.
    pub ms_without_detection: Option<f64>,
    /// Stabilizer reports a stable outline.
    pub is_stable: bool,
    /// Stabilizer progress in `[0, 1]`.
    pub progress: f64,
    /// How often stability was broken since the outline was acquired.
    pub stability_breaks: u32,
}

/// Choose the hint for the current frame, if any.
pub fn select_hint(ctx: &HintContext) -> Option<ScanHint> {
    if ctx.detection_disabled {
        return Some(ScanHint::CaptureManually);
    }
    if let Some(elapsed) = ctx.ms_without_detection {
        return (elapsed > NO_DETECTION_HINT_MS).then_some(ScanHint::HoldInFrame);
    }
    if ctx.is_stable {
        return Some(ScanHint::DocumentDetected);
    }
    if ctx.progress > PROGRESS_HINT_THRESHOLD {
        return Some(ScanHint::DontMove);
    }
    if ctx.stability_breaks >= STABILITY_BREAKS_BEFORE_HINT {
        return Some(ScanHint::HoldStill);
    }
    None
}

// -- Error messages ------------------------------------------------------------

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retrying the same action may work.
    Transient,
    /// The user must do something different (recapture, adjust corners).
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with a plain English message and a suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the caller may retry automatically.
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `ScanwerkError` into something a person holding a phone over a
/// sheet of paper can act on.
pub fn humanize_error(err: &ScanwerkError) -> HumanError {
    match err {
        ScanwerkError::Correction(detail) => HumanError::new(
            "We couldn't straighten this page.",
            format!("Drag the corners onto the edges of the page, or retake the photo. ({detail})"),
            false,
            Severity::ActionRequired,
        ),
        ScanwerkError::ImageError(_) => HumanError::new(
            "This photo couldn't be read.",
            "Please take the picture again.",
            false,
            Severity::ActionRequired,
        ),
        ScanwerkError::ModelLoad(_)
        | ScanwerkError::ModelTimeout { .. }
        | ScanwerkError::Inference(_)
        | ScanwerkError::ModelUnavailable => HumanError::new(
            "Smart edge detection isn't available.",
            "Scanning still works; the standard detector is used instead.",
            false,
            Severity::Transient,
        ),
        ScanwerkError::NoPages => HumanError::new(
            "There are no pages yet.",
            "Capture at least one page before finishing.",
            false,
            Severity::ActionRequired,
        ),
        ScanwerkError::PageIndex { .. } | ScanwerkError::InvalidTransition { .. } => HumanError::new(
            "That action isn't possible right now.",
            "Please try again.",
            true,
            Severity::Transient,
        ),
        ScanwerkError::PlatformUnavailable | ScanwerkError::Bridge(_) => HumanError::new(
            "The camera isn't available.",
            "Check that the app may use the camera, or import a photo instead.",
            false,
            Severity::ActionRequired,
        ),
        ScanwerkError::InvalidConfig(detail) => HumanError::new(
            "The scanner settings are invalid.",
            format!("Reset the scanner settings to their defaults. ({detail})"),
            false,
            Severity::Permanent,
        ),
        ScanwerkError::Io(_) | ScanwerkError::Serialization(_) => HumanError::new(
            "Something went wrong while saving.",
            "Please try again.",
            true,
            Severity::Transient,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_empty_frame_asks_for_document() {
        let ctx = HintContext {
            ms_without_detection: Some(3500.0),
            ..Default::default()
        };
        assert_eq!(select_hint(&ctx), Some(ScanHint::HoldInFrame));

        let ctx = HintContext {
            ms_without_detection: Some(1000.0),
            ..Default::default()
        };
        assert_eq!(select_hint(&ctx), None);
    }

    #[test]
    fn progress_and_stability_hints() {
        let running = HintContext {
            progress: 0.4,
            ..Default::default()
        };
        assert_eq!(select_hint(&running), Some(ScanHint::DontMove));

        let stable = HintContext {
            is_stable: true,
            progress: 1.0,
            ..Default::default()
        };
        assert_eq!(select_hint(&stable), Some(ScanHint::DocumentDetected));

        let shaky = HintContext {
            stability_breaks: 3,
            ..Default::default()
        };
        assert_eq!(select_hint(&shaky), Some(ScanHint::HoldStill));
    }

    #[test]
    fn disabled_detection_overrides_everything() {
        let ctx = HintContext {
            detection_disabled: true,
            is_stable: true,
            ..Default::default()
        };
        assert_eq!(select_hint(&ctx), Some(ScanHint::CaptureManually));
    }

    #[test]
    fn correction_failure_asks_for_action() {
        let human = humanize_error(&ScanwerkError::Correction("crop is 4x4 px".into()));
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
        assert!(human.suggestion.contains("4x4"));
    }

    #[test]
    fn model_failures_are_transient() {
        let human = humanize_error(&ScanwerkError::ModelTimeout { timeout_ms: 5000 });
        assert_eq!(human.severity, Severity::Transient);
    }
}
