// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic trait definitions for the scanner's collaborators.

use std::sync::Arc;

use image::RgbaImage;
use scanwerk_core::error::Result;
use scanwerk_core::types::{PageId, Rotation};

/// One camera frame (or a still photo presented as a frame).
///
/// Pixels sit behind an `Arc` so the detection worker and the capture path can
/// hold the same frame without copying it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbaImage>,
    /// Capture time in milliseconds on a monotonic clock of the source's choosing.
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn new(image: RgbaImage, timestamp_ms: f64) -> Self {
        Self {
            image: Arc::new(image),
            timestamp_ms,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Supplies frames to the detection loop.
pub trait FrameSource: Send {
    /// The next frame, or `Ok(None)` once the source is exhausted (end of a
    /// recording, still image already consumed, camera stopped).
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// A page as handed to the capture sink: de-skewed (when possible) and with
/// its rotation already applied to the pixels.
#[derive(Debug, Clone)]
pub struct FinishedPage {
    pub id: PageId,
    /// Position in the batch, zero-based.
    pub index: usize,
    pub image: RgbaImage,
    /// Rotation that was applied.
    pub rotation: Rotation,
    /// `false` when perspective correction failed and the raw capture was
    /// passed through instead.
    pub corrected: bool,
}

/// Receives the finished batch. How pages are stored or transmitted is up to
/// the implementation.
pub trait CaptureSink: Send {
    fn deliver(&mut self, pages: Vec<FinishedPage>) -> Result<()>;
}
