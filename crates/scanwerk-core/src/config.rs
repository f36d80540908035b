// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner configuration.
//
// Every section has serde defaults so a partial JSON file (or none at all)
// yields a working scanner.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanwerkError};
use crate::types::DetectionStrategy;

/// Top-level scanner settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Which detector the session starts with.
    pub strategy: DetectionStrategy,
    pub detection: DetectionConfig,
    pub stability: StabilityConfig,
    pub capture: CaptureConfig,
    pub correction: CorrectionConfig,
}

/// Detector tuning. Both detectors read the area window; the rest is
/// specific to one of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Width of the downscaled working buffer in pixels.
    pub working_width: u32,
    /// Smallest fraction of the frame a document may cover.
    pub min_area_ratio: f64,
    /// Largest fraction of the frame a document may cover.
    pub max_area_ratio: f64,
    /// Lower bound for the adaptive edge threshold (0–255).
    pub edge_threshold_floor: f64,
    /// Multiplier on the mean non-zero edge magnitude.
    pub edge_threshold_gain: f64,
    /// How many of the largest contours are tried per frame.
    pub max_candidates: usize,
    /// Saliency probability above which a pixel counts as document.
    pub saliency_threshold: f32,
    /// Exported saliency network. `None` disables the ML strategy.
    pub model_path: Option<PathBuf>,
    /// Upper bound on model loading before falling back to classical.
    pub model_load_timeout_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            working_width: 320,
            min_area_ratio: 0.05,
            max_area_ratio: 0.95,
            edge_threshold_floor: 30.0,
            edge_threshold_gain: 1.2,
            max_candidates: 5,
            saliency_threshold: 0.35,
            model_path: None,
            model_load_timeout_ms: 5000,
        }
    }
}

/// Temporal stabilizer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// How long corners must stay put before auto-capture fires.
    pub duration_ms: u64,
    /// Largest corner movement (normalized) still counted as holding still.
    pub jitter_tolerance: f64,
    /// One-Euro filter base cutoff, Hz.
    pub min_cutoff: f64,
    /// One-Euro filter speed coefficient.
    pub beta: f64,
    /// Cutoff for the derivative estimate, Hz.
    pub d_cutoff: f64,
    /// Detections below this confidence are treated as lost.
    pub min_confidence: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            duration_ms: 1500,
            jitter_tolerance: 0.02,
            min_cutoff: 1.0,
            beta: 8.0,
            d_cutoff: 1.0,
            min_confidence: 0.35,
        }
    }
}

/// Capture flow and output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Batch limit; captures beyond it are ignored.
    pub max_pages: usize,
    /// Detection cadence cap.
    pub target_fps: u32,
    /// Capture automatically when the stabilizer fires.
    pub auto_capture: bool,
    /// Longest side of page thumbnails.
    pub thumbnail_max_dim: u32,
    /// Longest side of images handed to the upload collaborator.
    pub upload_max_dim: u32,
    /// JPEG quality (1–100) for upload images.
    pub upload_jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_pages: 50,
            target_fps: 15,
            auto_capture: true,
            thumbnail_max_dim: 256,
            upload_max_dim: 2000,
            upload_jpeg_quality: 85,
        }
    }
}

/// Perspective correction output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Cap on the longer output side; aspect ratio is preserved.
    pub max_output_dim: Option<u32>,
    /// Fill for output pixels that map outside the source.
    pub border: [u8; 4],
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_output_dim: None,
            border: [255, 255, 255, 255],
        }
    }
}

impl ScannerConfig {
    /// Load settings from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), strategy = %config.strategy, "loaded scanner config");
        Ok(config)
    }

    /// Write settings as pretty-printed JSON.
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.working_width < 64 {
            return Err(invalid(format!("detection.working_width {} is below 64", d.working_width)));
        }
        if !(0.0..1.0).contains(&d.min_area_ratio)
            || !(0.0..=1.0).contains(&d.max_area_ratio)
            || d.min_area_ratio >= d.max_area_ratio
        {
            return Err(invalid(format!(
                "detection area window [{}, {}] must satisfy 0 <= min < max <= 1",
                d.min_area_ratio, d.max_area_ratio
            )));
        }
        if !(d.edge_threshold_floor >= 0.0) || !(d.edge_threshold_gain > 0.0) {
            return Err(invalid("edge threshold floor and gain must be positive".into()));
        }
        if d.max_candidates == 0 {
            return Err(invalid("detection.max_candidates must be at least 1".into()));
        }
        if !(d.saliency_threshold > 0.0 && d.saliency_threshold < 1.0) {
            return Err(invalid(format!(
                "detection.saliency_threshold {} must be in (0, 1)",
                d.saliency_threshold
            )));
        }

        let s = &self.stability;
        if s.duration_ms == 0 {
            return Err(invalid("stability.duration_ms must be positive".into()));
        }
        if !(s.jitter_tolerance > 0.0) {
            return Err(invalid("stability.jitter_tolerance must be positive".into()));
        }
        if !(s.min_cutoff > 0.0) || !(s.d_cutoff > 0.0) || !(s.beta >= 0.0) {
            return Err(invalid("stability filter cutoffs must be positive and beta non-negative".into()));
        }

        let c = &self.capture;
        if c.max_pages == 0 {
            return Err(invalid("capture.max_pages must be at least 1".into()));
        }
        if c.target_fps == 0 || c.target_fps > 120 {
            return Err(invalid(format!("capture.target_fps {} must be in 1..=120", c.target_fps)));
        }
        if !(1..=100).contains(&c.upload_jpeg_quality) {
            return Err(invalid(format!(
                "capture.upload_jpeg_quality {} must be in 1..=100",
                c.upload_jpeg_quality
            )));
        }

        if let Some(max) = self.correction.max_output_dim {
            if max < 10 {
                return Err(invalid(format!("correction.max_output_dim {max} is below 10")));
            }
        }
        Ok(())
    }
}

fn invalid(message: String) -> ScanwerkError {
    ScanwerkError::InvalidConfig(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScannerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.strategy, DetectionStrategy::Classical);
        assert_eq!(config.stability.duration_ms, 1500);
        assert_eq!(config.capture.max_pages, 50);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ScannerConfig =
            serde_json::from_str(r#"{"strategy":"ml","capture":{"max_pages":3}}"#).unwrap();
        assert_eq!(config.strategy, DetectionStrategy::Ml);
        assert_eq!(config.capture.max_pages, 3);
        assert_eq!(config.capture.target_fps, 15);
        assert_eq!(config.detection.working_width, 320);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.json");

        let mut config = ScannerConfig::default();
        config.detection.model_path = Some(PathBuf::from("models/saliency.rten"));
        config.correction.max_output_dim = Some(1500);
        config.save_json_file(&path).unwrap();

        let loaded = ScannerConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn inverted_area_window_is_rejected() {
        let mut config = ScannerConfig::default();
        config.detection.min_area_ratio = 0.9;
        config.detection.max_area_ratio = 0.2;
        assert!(matches!(config.validate(), Err(ScanwerkError::InvalidConfig(_))));
    }

    #[test]
    fn invalid_file_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"capture":{"max_pages":0}}"#).unwrap();
        assert!(matches!(
            ScannerConfig::from_json_file(&path),
            Err(ScanwerkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ScannerConfig::from_json_file(dir.path().join("absent.json")),
            Err(ScanwerkError::Io(_))
        ));
    }
}
