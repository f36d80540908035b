// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page batch — the ordered, bounded list of captured pages for one session.
//
// Pages are mutated only through the batch (rotation, corner adjustment), so
// the active-page index and thumbnails can never drift out of sync with the
// page list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbaImage;
use scanwerk_core::config::CaptureConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{CornerSet, PageId, Rotation, RotationDirection};
use scanwerk_vision::ImageProcessor;
use tracing::{debug, info};

/// One captured page.
///
/// The raw capture never changes after creation; corners and rotation are
/// edited through [`PageBatch`].
#[derive(Debug, Clone)]
pub struct ScannedPage {
    id: PageId,
    raw: Arc<RgbaImage>,
    corners: Option<CornerSet>,
    rotation: Rotation,
    /// Unrotated thumbnail, the source for `thumbnail` on every rotation.
    base_thumbnail: RgbaImage,
    thumbnail: RgbaImage,
    captured_at: DateTime<Utc>,
}

impl ScannedPage {
    fn new(raw: Arc<RgbaImage>, corners: Option<CornerSet>, thumbnail_max_dim: u32) -> Self {
        let base_thumbnail = ImageProcessor::from_rgba(raw.as_ref().clone())
            .thumbnail(thumbnail_max_dim)
            .into_rgba();
        Self {
            id: PageId::new(),
            raw,
            corners,
            rotation: Rotation::Deg0,
            thumbnail: base_thumbnail.clone(),
            base_thumbnail,
            captured_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn raw(&self) -> &Arc<RgbaImage> {
        &self.raw
    }

    /// Detected or adjusted corners; `None` means the whole frame.
    pub fn corners(&self) -> Option<&CornerSet> {
        self.corners.as_ref()
    }

    /// Corners to warp with, falling back to the full frame.
    pub fn effective_corners(&self) -> CornerSet {
        self.corners.unwrap_or_else(CornerSet::full_frame)
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Thumbnail with the page rotation applied.
    pub fn thumbnail(&self) -> &RgbaImage {
        &self.thumbnail
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
        self.thumbnail = ImageProcessor::from_rgba(self.base_thumbnail.clone())
            .rotate(rotation)
            .into_rgba();
    }
}

/// Ordered, bounded collection of pages with an active-page cursor.
pub struct PageBatch {
    pages: Vec<ScannedPage>,
    active: usize,
    max_pages: usize,
    thumbnail_max_dim: u32,
}

impl Default for PageBatch {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

impl PageBatch {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            pages: Vec::new(),
            active: 0,
            max_pages: config.max_pages,
            thumbnail_max_dim: config.thumbnail_max_dim,
        }
    }

    // -- Queries --------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pages.len() >= self.max_pages
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn pages(&self) -> &[ScannedPage] {
        &self.pages
    }

    pub fn get(&self, index: usize) -> Option<&ScannedPage> {
        self.pages.get(index)
    }

    /// Index of the active page. Always in range while the batch is non-empty.
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_page(&self) -> Option<&ScannedPage> {
        self.pages.get(self.active)
    }

    // -- Mutations ------------------------------------------------------------

    /// Append a page and make it active.
    ///
    /// A full batch or an empty image makes this a no-op returning `None`.
    pub fn add(&mut self, raw: Arc<RgbaImage>, corners: Option<CornerSet>) -> Option<PageId> {
        if self.is_full() {
            debug!(max_pages = self.max_pages, "batch full, capture ignored");
            return None;
        }
        if raw.width() == 0 || raw.height() == 0 {
            debug!("empty capture ignored");
            return None;
        }

        let page = ScannedPage::new(raw, corners.map(|c| c.clamped()), self.thumbnail_max_dim);
        let id = page.id;
        self.pages.push(page);
        self.active = self.pages.len() - 1;
        info!(page = %id, index = self.active, detected = corners.is_some(), "Page captured");
        Some(id)
    }

    /// Remove and return the page at `index`; the active index is pulled back
    /// into range.
    pub fn remove(&mut self, index: usize) -> Result<ScannedPage> {
        self.check_index(index)?;
        let page = self.pages.remove(index);
        self.active = self.active.min(self.pages.len().saturating_sub(1));
        debug!(page = %page.id, index, remaining = self.pages.len(), "Page removed");
        Ok(page)
    }

    /// Move the page at `from` to position `to`; the moved page becomes active.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        self.check_index(from)?;
        self.check_index(to)?;
        let page = self.pages.remove(from);
        self.pages.insert(to, page);
        self.active = to;
        Ok(())
    }

    /// Replace a page's corners, clamped to the frame.
    pub fn update_corners(&mut self, index: usize, corners: CornerSet) -> Result<()> {
        self.check_index(index)?;
        let page = &mut self.pages[index];
        page.corners = Some(corners.clamped());
        debug!(page = %page.id, "Corners updated");
        Ok(())
    }

    /// Turn a page by a quarter and refresh its thumbnail.
    pub fn rotate(&mut self, index: usize, direction: RotationDirection) -> Result<Rotation> {
        self.check_index(index)?;
        let page = &mut self.pages[index];
        let rotation = page.rotation.rotated(direction);
        page.set_rotation(rotation);
        debug!(page = %page.id, degrees = rotation.degrees(), "Page rotated");
        Ok(rotation)
    }

    pub fn set_active(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.active = index;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.active = 0;
    }

    /// Drain every page in order, leaving the batch empty.
    pub fn take_all(&mut self) -> Vec<ScannedPage> {
        self.active = 0;
        std::mem::take(&mut self.pages)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.pages.len() {
            Ok(())
        } else {
            Err(ScanwerkError::PageIndex {
                index,
                len: self.pages.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use scanwerk_core::types::Point;

    fn batch(max_pages: usize) -> PageBatch {
        PageBatch::new(&CaptureConfig {
            max_pages,
            thumbnail_max_dim: 32,
            ..CaptureConfig::default()
        })
    }

    fn frame(w: u32, h: u32) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba([200, 200, 200, 255])))
    }

    #[test]
    fn capture_beyond_limit_is_a_noop() {
        let mut b = batch(3);
        for _ in 0..4 {
            b.add(frame(64, 48), None);
        }
        assert_eq!(b.len(), 3);
        assert!(b.is_full());
        assert!(b.add(frame(64, 48), None).is_none());
    }

    #[test]
    fn empty_frames_are_ignored() {
        let mut b = batch(3);
        assert!(b.add(Arc::new(RgbaImage::new(0, 0)), None).is_none());
        assert!(b.is_empty());
    }

    #[test]
    fn add_activates_newest_page() {
        let mut b = batch(5);
        b.add(frame(64, 48), None);
        let second = b.add(frame(64, 48), None).unwrap();
        assert_eq!(b.active_index(), 1);
        assert_eq!(b.active_page().unwrap().id(), second);
    }

    #[test]
    fn thumbnail_is_bounded_and_follows_rotation() {
        let mut b = batch(5);
        b.add(frame(64, 48), None);
        assert_eq!(b.pages()[0].thumbnail().dimensions(), (32, 24));

        assert_eq!(b.rotate(0, RotationDirection::Clockwise).unwrap(), Rotation::Deg90);
        assert_eq!(b.pages()[0].thumbnail().dimensions(), (24, 32));
    }

    #[test]
    fn four_rotations_return_to_start() {
        let mut b = batch(5);
        b.add(frame(64, 48), None);
        for _ in 0..4 {
            b.rotate(0, RotationDirection::Clockwise).unwrap();
        }
        assert_eq!(b.pages()[0].rotation(), Rotation::Deg0);
        assert_eq!(b.pages()[0].thumbnail().dimensions(), (32, 24));
    }

    #[test]
    fn removing_keeps_active_in_range() {
        let mut b = batch(5);
        for _ in 0..3 {
            b.add(frame(16, 16), None);
        }
        assert_eq!(b.active_index(), 2);
        b.remove(2).unwrap();
        assert_eq!(b.active_index(), 1);
        b.remove(0).unwrap();
        b.remove(0).unwrap();
        assert_eq!(b.active_index(), 0);
        assert!(matches!(b.remove(0), Err(ScanwerkError::PageIndex { index: 0, len: 0 })));
    }

    #[test]
    fn reorder_moves_and_activates() {
        let mut b = batch(5);
        let ids: Vec<_> = (0..3).map(|_| b.add(frame(16, 16), None).unwrap()).collect();
        b.reorder(0, 2).unwrap();
        let order: Vec<_> = b.pages().iter().map(ScannedPage::id).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
        assert_eq!(b.active_index(), 2);
        assert!(b.reorder(0, 3).is_err());
    }

    #[test]
    fn corner_updates_are_ordered_and_clamped() {
        let mut b = batch(5);
        b.add(frame(16, 16), None);
        let shuffled = CornerSet::from_points([
            Point::new(0.9, 0.9),
            Point::new(-0.1, 0.1),
            Point::new(0.9, 0.1),
            Point::new(0.1, 0.9),
        ]);
        b.update_corners(0, shuffled).unwrap();
        let corners = b.pages()[0].corners().unwrap();
        assert_eq!(corners.top_left(), Point::new(0.0, 0.1));
        assert_eq!(corners.bottom_right(), Point::new(0.9, 0.9));
    }

    #[test]
    fn missing_corners_fall_back_to_full_frame() {
        let mut b = batch(5);
        b.add(frame(16, 16), None);
        assert_eq!(b.pages()[0].effective_corners(), CornerSet::full_frame());
    }

    #[test]
    fn take_all_drains_in_order() {
        let mut b = batch(5);
        let ids: Vec<_> = (0..2).map(|_| b.add(frame(16, 16), None).unwrap()).collect();
        let taken: Vec<_> = b.take_all().iter().map(ScannedPage::id).collect();
        assert_eq!(taken, ids);
        assert!(b.is_empty());
        assert_eq!(b.active_index(), 0);
    }
}
