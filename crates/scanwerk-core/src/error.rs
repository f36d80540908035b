// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.
//
// Expected non-detections and degenerate geometry are NOT errors — they are
// reported as `DetectionResult::none()`. Only resource failures and invalid
// correction input are raised through this type.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Imaging errors --
    #[error("image processing failed: {0}")]
    ImageError(String),

    #[error("perspective correction failed: {0}")]
    Correction(String),

    // -- Saliency model errors --
    #[error("saliency model failed to load: {0}")]
    ModelLoad(String),

    #[error("saliency model did not load within {timeout_ms} ms")]
    ModelTimeout { timeout_ms: u64 },

    #[error("saliency inference failed: {0}")]
    Inference(String),

    #[error("saliency model has been disposed")]
    ModelUnavailable,

    // -- Capture flow --
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot {action} while {state}")]
    InvalidTransition { state: String, action: &'static str },

    #[error("page index {index} out of range (batch holds {len} pages)")]
    PageIndex { index: usize, len: usize },

    #[error("batch is empty")]
    NoPages,

    // -- Storage / serialization --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Platform bridge --
    #[error("platform bridge error: {0}")]
    Bridge(String),

    #[error("feature not available on this platform")]
    PlatformUnavailable,
}

impl ScanwerkError {
    /// Whether this error means the saliency path is unusable and the caller
    /// should continue with the classical detector.
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::ModelLoad(_) | Self::ModelTimeout { .. } | Self::Inference(_) | Self::ModelUnavailable
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
