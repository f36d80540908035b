// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Writes a finished batch to a directory as upload-sized JPEGs.

use std::path::{Path, PathBuf};

use scanwerk_bridge::{CaptureSink, FinishedPage};
use scanwerk_core::config::CaptureConfig;
use scanwerk_core::error::Result;
use scanwerk_vision::prepare_for_upload;
use tracing::{info, instrument, warn};

/// Stores each page as `page-001.jpg`, `page-002.jpg`, ... in batch order.
pub struct DirectorySink {
    dir: PathBuf,
    max_dim: u32,
    quality: u8,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, config: &CaptureConfig) -> Self {
        Self {
            dir: dir.into(),
            max_dim: config.upload_max_dim,
            quality: config.upload_jpeg_quality,
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl CaptureSink for DirectorySink {
    #[instrument(skip_all, fields(dir = %self.dir.display(), pages = pages.len()))]
    fn deliver(&mut self, pages: Vec<FinishedPage>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for page in pages {
            if !page.corrected {
                warn!(page = %page.id, index = page.index, "page stored uncorrected");
            }
            let bytes = prepare_for_upload(page.image, self.max_dim, self.quality)?;
            let path = self.dir.join(format!("page-{:03}.jpg", page.index + 1));
            std::fs::write(&path, &bytes)?;
            info!(path = %path.display(), bytes = bytes.len(), "Page written");
            self.written.push(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use scanwerk_core::types::{PageId, Rotation};

    fn page(index: usize, w: u32, h: u32) -> FinishedPage {
        FinishedPage {
            id: PageId::new(),
            index,
            image: RgbaImage::from_pixel(w, h, Rgba([240, 240, 240, 255])),
            rotation: Rotation::Deg0,
            corrected: true,
        }
    }

    #[test]
    fn writes_numbered_jpegs() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("batch");
        let mut sink = DirectorySink::new(&out, &CaptureConfig::default());

        sink.deliver(vec![page(0, 40, 30), page(1, 30, 40)]).unwrap();

        assert_eq!(sink.written().len(), 2);
        assert!(out.join("page-001.jpg").exists());
        let second = std::fs::read(out.join("page-002.jpg")).unwrap();
        assert_eq!(&second[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn large_pages_are_downscaled() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CaptureConfig {
            upload_max_dim: 50,
            ..CaptureConfig::default()
        };
        let mut sink = DirectorySink::new(tmp.path(), &config);
        sink.deliver(vec![page(0, 200, 100)]).unwrap();

        let stored = image::open(&sink.written()[0]).unwrap();
        assert_eq!((stored.width(), stored.height()), (50, 25));
    }
}
