// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub collaborators for desktop/CI builds and tests.
//
// `StillImageSource` replays a photo as a steady frame stream, which is how
// the command-line tool drives the capture loop. `ScriptedFrameSource` plays
// back a fixed list of frames. `MemorySink` keeps delivered batches in memory.
// `StubCamera` stands in for the native camera and always reports
// `PlatformUnavailable`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument};

use crate::traits::{CaptureSink, FinishedPage, Frame, FrameSource};

/// Replays one still image as `frame_count` frames, `interval_ms` apart.
pub struct StillImageSource {
    image: Arc<RgbaImage>,
    interval_ms: f64,
    remaining: usize,
    next_timestamp_ms: f64,
}

impl StillImageSource {
    pub fn new(image: RgbaImage, frame_count: usize, interval_ms: f64) -> Self {
        Self {
            image: Arc::new(image),
            interval_ms,
            remaining: frame_count,
            next_timestamp_ms: 0.0,
        }
    }

    /// Decode a photo from disk.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, frame_count: usize, interval_ms: f64) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|err| ScanwerkError::ImageError(format!("failed to open {}: {}", path.display(), err)))?
            .to_rgba8();
        info!(width = image.width(), height = image.height(), frame_count, "Still image source ready");
        Ok(Self::new(image, frame_count, interval_ms))
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let frame = Frame {
            image: Arc::clone(&self.image),
            timestamp_ms: self.next_timestamp_ms,
        };
        self.next_timestamp_ms += self.interval_ms;
        Ok(Some(frame))
    }
}

/// Plays back a fixed sequence of frames, then reports exhaustion.
#[derive(Default)]
pub struct ScriptedFrameSource {
    frames: VecDeque<Frame>,
}

impl ScriptedFrameSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Collects delivered batches in memory.
#[derive(Default)]
pub struct MemorySink {
    batches: Vec<Vec<FinishedPage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch delivered so far, oldest first.
    pub fn batches(&self) -> &[Vec<FinishedPage>] {
        &self.batches
    }

    pub fn last_batch(&self) -> Option<&[FinishedPage]> {
        self.batches.last().map(Vec::as_slice)
    }
}

impl CaptureSink for MemorySink {
    fn deliver(&mut self, pages: Vec<FinishedPage>) -> Result<()> {
        debug!(pages = pages.len(), "Batch delivered to memory sink");
        self.batches.push(pages);
        Ok(())
    }
}

/// Camera placeholder on platforms without a native bridge.
pub struct StubCamera;

impl FrameSource for StubCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        tracing::warn!("FrameSource::next_frame called on stub camera");
        Err(ScanwerkError::PlatformUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use scanwerk_core::types::{PageId, Rotation};

    fn blank(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))
    }

    #[test]
    fn still_source_paces_and_ends() {
        let mut source = StillImageSource::new(blank(8, 8), 3, 50.0);
        let stamps: Vec<f64> = std::iter::from_fn(|| source.next_frame().unwrap())
            .map(|f| f.timestamp_ms)
            .collect();
        assert_eq!(stamps, vec![0.0, 50.0, 100.0]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn still_source_shares_pixels() {
        let mut source = StillImageSource::new(blank(8, 8), 2, 10.0);
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert!(Arc::ptr_eq(&a.image, &b.image));
    }

    #[test]
    fn scripted_source_plays_in_order() {
        let mut source = ScriptedFrameSource::new([Frame::new(blank(4, 4), 1.0), Frame::new(blank(6, 6), 2.0)]);
        source.push(Frame::new(blank(2, 2), 3.0));
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 4);
        assert_eq!(source.next_frame().unwrap().unwrap().width(), 6);
        assert_eq!(source.next_frame().unwrap().unwrap().timestamp_ms, 3.0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn memory_sink_keeps_batches() {
        let mut sink = MemorySink::new();
        let page = FinishedPage {
            id: PageId::new(),
            index: 0,
            image: blank(4, 4),
            rotation: Rotation::Deg90,
            corrected: true,
        };
        sink.deliver(vec![page]).unwrap();
        sink.deliver(Vec::new()).unwrap();
        assert_eq!(sink.batches().len(), 2);
        assert_eq!(sink.batches()[0][0].rotation, Rotation::Deg90);
        assert!(sink.last_batch().unwrap().is_empty());
    }

    #[test]
    fn stub_camera_is_unavailable() {
        let mut camera = crate::platform_camera();
        assert!(matches!(camera.next_frame(), Err(ScanwerkError::PlatformUnavailable)));
    }

    #[test]
    fn missing_photo_is_an_image_error() {
        let err = StillImageSource::open("/nonexistent/page.jpg", 1, 10.0).err().unwrap();
        assert!(matches!(err, ScanwerkError::ImageError(_)));
    }
}
