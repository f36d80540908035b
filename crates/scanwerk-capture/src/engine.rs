// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Detection engine — owns the session's detector and drives the frame loop.
//
// Responsibilities:
//   - Strategy selection, with a bounded model load and classical fallback
//   - Running each detection on a blocking worker, one at a time
//   - Swapping to the classical detector when the saliency model fails
//   - Disabling detection after repeated failures (capture stays manual)
//   - Lowering the working resolution once when frames are consistently slow
//   - Picking the user-facing hint for each frame

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scanwerk_bridge::{Frame, FrameSource};
use scanwerk_core::config::{DetectionConfig, ScannerConfig};
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::hints::{HintContext, ScanHint, select_hint};
use scanwerk_core::types::{DetectionResult, DetectionStrategy, PageId};
use scanwerk_vision::detect::{SaliencyDetector, SaliencyModel};
use scanwerk_vision::{ClassicalDetector, DocumentDetector};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::session::{ScanSession, SessionState};
use crate::stabilizer::StabilizationState;

/// Consecutive failed detections before detection is switched off.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// Frames averaged when deciding whether detection is too slow.
pub const TIMING_WINDOW: usize = 20;
/// Mean detection time above which the working resolution is lowered.
pub const SLOW_FRAME_MS: f64 = 40.0;

/// Everything the UI needs after one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub timestamp_ms: f64,
    /// `None` when no detection ran (disabled) or it failed.
    pub detection: Option<DetectionResult>,
    pub stability: StabilizationState,
    pub hint: Option<ScanHint>,
    pub captured: Option<PageId>,
}

/// Why [`DetectionEngine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The frame source has no more frames.
    SourceExhausted,
    /// The stop signal was raised.
    Stopped,
    /// The session left `Capturing` (a page was captured).
    LeftCapturing,
}

/// Per-session detector plus the bookkeeping around it.
pub struct DetectionEngine {
    /// `None` only while a detection is running on a worker.
    detector: Option<Box<dyn DocumentDetector>>,
    detection_config: DetectionConfig,
    consecutive_errors: u32,
    disabled: bool,
    frame_times: VecDeque<f64>,
    resolution_reduced: bool,
    started_ms: Option<f64>,
    last_found_ms: Option<f64>,
    currently_found: bool,
}

impl DetectionEngine {
    // -- Construction ---------------------------------------------------------

    /// Build the engine for `config.strategy`.
    ///
    /// The saliency strategy loads its model under
    /// `detection.model_load_timeout_ms`; any failure falls back to the
    /// classical detector.
    pub async fn new(config: &ScannerConfig) -> Self {
        match config.strategy {
            DetectionStrategy::Classical => Self::with_detector(
                Box::new(ClassicalDetector::new(&config.detection)),
                &config.detection,
            ),
            DetectionStrategy::Ml => {
                let path = config.detection.model_path.clone();
                Self::with_model_loader(&config.detection, move || load_model(path)).await
            }
        }
    }

    /// Use an already constructed detector.
    pub fn with_detector(detector: Box<dyn DocumentDetector>, config: &DetectionConfig) -> Self {
        info!(detector = detector.name(), "Detection engine ready");
        Self {
            detector: Some(detector),
            detection_config: config.clone(),
            consecutive_errors: 0,
            disabled: false,
            frame_times: VecDeque::with_capacity(TIMING_WINDOW),
            resolution_reduced: false,
            started_ms: None,
            last_found_ms: None,
            currently_found: false,
        }
    }

    /// Saliency strategy with a custom model loader. The loader runs on a
    /// blocking worker and is abandoned if it exceeds the load timeout.
    pub async fn with_model_loader<F>(config: &DetectionConfig, loader: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn SaliencyModel>> + Send + 'static,
    {
        let timeout = Duration::from_millis(config.model_load_timeout_ms);
        let detector: Box<dyn DocumentDetector> = match load_with_timeout(loader, timeout).await {
            Ok(model) => Box::new(SaliencyDetector::new(model, config)),
            Err(err) => {
                warn!(error = %err, "saliency model unavailable, falling back to classical detector");
                Box::new(ClassicalDetector::new(config))
            }
        };
        Self::with_detector(detector, config)
    }

    // -- Queries --------------------------------------------------------------

    pub fn detector_name(&self) -> &'static str {
        self.detector.as_ref().map_or("none", |d| d.name())
    }

    pub fn strategy(&self) -> Option<DetectionStrategy> {
        self.detector.as_ref().map(|d| d.strategy())
    }

    /// Detection was switched off after repeated failures.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    // -- Detection ------------------------------------------------------------

    /// Run the detector on `frame` on a blocking worker and wait for it.
    ///
    /// Returns `None` when detection is disabled or this frame's detection
    /// failed; failures never reach the caller as errors.
    pub async fn detect_async(&mut self, frame: &Frame) -> Option<DetectionResult> {
        if self.disabled {
            return None;
        }
        let mut detector = self.detector.take()?;
        let image = Arc::clone(&frame.image);

        let joined = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let result = detector.detect(&image);
            (detector, result, started.elapsed())
        })
        .await;

        let result = match joined {
            Ok((detector, result, elapsed)) => {
                self.detector = Some(detector);
                self.record_frame_time(elapsed.as_secs_f64() * 1000.0);
                result
            }
            Err(err) => {
                warn!(error = %err, "detection worker died, replacing detector");
                self.detector = Some(Box::new(ClassicalDetector::new(&self.detection_config)));
                Err(ScanwerkError::Bridge(format!("detection worker failed: {err}")))
            }
        };

        let outcome = self.absorb(result);
        self.note_outcome(outcome.as_ref(), frame.timestamp_ms);
        outcome
    }

    /// Fold one detection outcome into the error budget and fallback policy.
    fn absorb(&mut self, result: Result<DetectionResult>) -> Option<DetectionResult> {
        match result {
            Ok(detection) => {
                self.consecutive_errors = 0;
                Some(detection)
            }
            Err(err) if err.is_model_failure() && self.strategy() == Some(DetectionStrategy::Ml) => {
                warn!(error = %err, "saliency detection failed, switching to classical detector");
                if let Some(mut old) = self.detector.take() {
                    old.dispose();
                }
                self.detector = Some(Box::new(ClassicalDetector::new(&self.detection_config)));
                self.frame_times.clear();
                self.resolution_reduced = false;
                Some(DetectionResult::none())
            }
            Err(err) => {
                self.consecutive_errors += 1;
                debug!(error = %err, consecutive = self.consecutive_errors, "detection failed");
                if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        consecutive = self.consecutive_errors,
                        "detection disabled for this session, capture manually"
                    );
                    self.disabled = true;
                }
                None
            }
        }
    }

    /// Track detection time; once per session, lower the working resolution
    /// when the rolling mean is too slow.
    pub(crate) fn record_frame_time(&mut self, ms: f64) {
        if self.resolution_reduced {
            return;
        }
        if self.frame_times.len() == TIMING_WINDOW {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(ms);
        if self.frame_times.len() < TIMING_WINDOW {
            return;
        }

        let mean = self.frame_times.iter().sum::<f64>() / TIMING_WINDOW as f64;
        if mean > SLOW_FRAME_MS {
            self.resolution_reduced = true;
            let reduced = self
                .detector
                .as_mut()
                .is_some_and(|d| d.reduce_resolution());
            info!(mean_ms = mean, reduced, "slow detection, lowering resolution");
        }
    }

    fn note_outcome(&mut self, outcome: Option<&DetectionResult>, timestamp_ms: f64) {
        self.started_ms.get_or_insert(timestamp_ms);
        if let Some(detection) = outcome {
            self.currently_found = detection.is_found();
            if self.currently_found {
                self.last_found_ms = Some(timestamp_ms);
            }
        }
    }

    /// The hint to show for the frame at `timestamp_ms`.
    pub fn hint(&self, timestamp_ms: f64, stability: &StabilizationState) -> Option<ScanHint> {
        let ms_without_detection = if self.currently_found {
            None
        } else {
            let since = match (self.started_ms, self.last_found_ms) {
                (Some(start), Some(found)) => start.max(found),
                (Some(start), None) => start,
                (None, _) => timestamp_ms,
            };
            Some(timestamp_ms - since)
        };
        select_hint(&HintContext {
            detection_disabled: self.disabled,
            ms_without_detection,
            is_stable: stability.is_stable,
            progress: stability.progress,
            stability_breaks: stability.stability_breaks,
        })
    }

    // -- Loop -----------------------------------------------------------------

    /// Pull frames from `source` at up to `target_fps`, detect, and feed the
    /// session until a page is captured, the source runs dry, or `stop`
    /// turns `true`. Any exit other than a capture resets the session's
    /// stabilizer, so the next loop needs a full stability window.
    ///
    /// Detections are awaited one at a time; ticks that pass while one is
    /// running are skipped rather than queued.
    #[instrument(skip_all, fields(detector = self.detector_name(), target_fps = target_fps))]
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        session: &mut ScanSession,
        target_fps: u32,
        mut stop: watch::Receiver<bool>,
        mut on_frame: impl FnMut(&FrameReport),
    ) -> Result<LoopExit> {
        if *session.state() != SessionState::Capturing {
            return Err(ScanwerkError::InvalidTransition {
                state: session.state().to_string(),
                action: "run detection",
            });
        }

        let period = Duration::from_secs_f64(1.0 / f64::from(target_fps.max(1)));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stop_open = true;

        loop {
            if *stop.borrow() {
                session.stop_capturing();
                return Ok(LoopExit::Stopped);
            }

            tokio::select! {
                changed = stop.changed(), if stop_open => {
                    if changed.is_err() {
                        // Sender gone: nobody can stop us any more.
                        stop_open = false;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("frame source exhausted");
                    session.stop_capturing();
                    return Ok(LoopExit::SourceExhausted);
                }
                Err(err) => {
                    session.stop_capturing();
                    return Err(err);
                }
            };

            let detection = self.detect_async(&frame).await;
            let (stability, captured) = match detection {
                Some(result) => {
                    let update = session.on_detection(&frame, result);
                    (update.stability, update.captured)
                }
                None => (*session.stability(), None),
            };

            let hint = if session.batch().is_full() {
                Some(ScanHint::BatchFull)
            } else {
                self.hint(frame.timestamp_ms, &stability)
            };
            let report = FrameReport {
                timestamp_ms: frame.timestamp_ms,
                detection,
                stability,
                hint,
                captured,
            };
            on_frame(&report);

            if *session.state() != SessionState::Capturing {
                return Ok(LoopExit::LeftCapturing);
            }
        }
    }
}

impl Drop for DetectionEngine {
    fn drop(&mut self) {
        if let Some(detector) = self.detector.as_mut() {
            detector.dispose();
        }
    }
}

/// Run `loader` on a blocking worker, giving up after `timeout`.
async fn load_with_timeout<F>(loader: F, timeout: Duration) -> Result<Box<dyn SaliencyModel>>
where
    F: FnOnce() -> Result<Box<dyn SaliencyModel>> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(loader);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(loaded)) => loaded,
        Ok(Err(err)) => Err(ScanwerkError::ModelLoad(format!("loader task failed: {err}"))),
        Err(_) => Err(ScanwerkError::ModelTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(feature = "ml")]
fn load_model(path: Option<std::path::PathBuf>) -> Result<Box<dyn SaliencyModel>> {
    let path = path.ok_or_else(|| ScanwerkError::ModelLoad("no model path configured".into()))?;
    let model = scanwerk_vision::RtenSaliencyModel::load(path)?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "ml"))]
fn load_model(_path: Option<std::path::PathBuf>) -> Result<Box<dyn SaliencyModel>> {
    Err(ScanwerkError::ModelLoad(
        "built without the `ml` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use scanwerk_bridge::{ScriptedFrameSource, StillImageSource};
    use scanwerk_core::config::CaptureConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A white 319×226 sheet on a black 400×300 frame.
    fn sheet() -> RgbaImage {
        RgbaImage::from_fn(400, 300, |x, y| {
            if (40..359).contains(&x) && (37..263).contains(&y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    fn manual_config() -> ScannerConfig {
        ScannerConfig {
            capture: CaptureConfig {
                auto_capture: false,
                ..CaptureConfig::default()
            },
            ..ScannerConfig::default()
        }
    }

    /// Fails every frame with the given error.
    struct Failing {
        strategy: DetectionStrategy,
        error: fn() -> ScanwerkError,
    }

    impl DocumentDetector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn strategy(&self) -> DetectionStrategy {
            self.strategy
        }

        fn detect(&mut self, _frame: &RgbaImage) -> Result<DetectionResult> {
            Err((self.error)())
        }
    }

    /// Counts `reduce_resolution` calls.
    struct Slow {
        reductions: Arc<AtomicUsize>,
    }

    impl DocumentDetector for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn strategy(&self) -> DetectionStrategy {
            DetectionStrategy::Classical
        }

        fn detect(&mut self, _frame: &RgbaImage) -> Result<DetectionResult> {
            Ok(DetectionResult::none())
        }

        fn reduce_resolution(&mut self) -> bool {
            self.reductions.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct Flat;

    impl SaliencyModel for Flat {
        fn infer(&mut self, _input: &[f32], size: usize, logits: &mut Vec<f32>) -> Result<()> {
            logits.clear();
            logits.resize(size * size, -10.0);
            Ok(())
        }
    }

    /// A stop channel whose sender is already gone.
    fn no_stop() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn still_photo_is_auto_captured() {
        let config = ScannerConfig::default();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);
        let mut source = StillImageSource::new(sheet(), 60, 50.0);

        let mut reports = Vec::new();
        let exit = engine
            .run(&mut source, &mut session, 1000, no_stop(), |r| reports.push(*r))
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::LeftCapturing);
        assert_eq!(session.batch().len(), 1);
        assert_eq!(*session.state(), SessionState::Reviewing);
        let last = reports.last().unwrap();
        assert!(last.captured.is_some());
        assert_eq!(last.hint, Some(ScanHint::DocumentDetected));
        assert!(reports.iter().all(|r| r.detection.is_some_and(|d| d.confidence > 0.6)));
    }

    #[tokio::test]
    async fn blank_frames_run_dry_with_a_hint() {
        let config = manual_config();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);
        let gray = RgbaImage::from_pixel(200, 150, Rgba([128, 128, 128, 255]));
        let mut source = StillImageSource::new(gray, 80, 50.0);

        let mut last = None;
        let exit = engine
            .run(&mut source, &mut session, 1000, no_stop(), |r| last = Some(*r))
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::SourceExhausted);
        let last = last.unwrap();
        assert_eq!(last.detection, Some(DetectionResult::none()));
        assert_eq!(last.hint, Some(ScanHint::HoldInFrame));
        assert!(session.batch().is_empty());
    }

    #[tokio::test]
    async fn repeated_failures_disable_detection() {
        let failing = Failing {
            strategy: DetectionStrategy::Classical,
            error: || ScanwerkError::ImageError("bad frame".into()),
        };
        let mut engine = DetectionEngine::with_detector(Box::new(failing), &DetectionConfig::default());
        let config = manual_config();
        let mut session = ScanSession::new(&config);
        let frames = (0..12).map(|i| Frame::new(RgbaImage::new(8, 8), f64::from(i) * 50.0));
        let mut source = ScriptedFrameSource::new(frames);

        let mut hints = Vec::new();
        engine
            .run(&mut source, &mut session, 1000, no_stop(), |r| hints.push(r.hint))
            .await
            .unwrap();

        assert!(engine.is_disabled());
        assert_eq!(hints.len(), 12);
        assert_eq!(hints[8], None);
        assert_eq!(hints[9], Some(ScanHint::CaptureManually));
        assert_eq!(hints[11], Some(ScanHint::CaptureManually));
    }

    #[tokio::test]
    async fn inference_failure_swaps_to_classical() {
        let failing = Failing {
            strategy: DetectionStrategy::Ml,
            error: || ScanwerkError::Inference("session crashed".into()),
        };
        let mut engine = DetectionEngine::with_detector(Box::new(failing), &DetectionConfig::default());

        let first = engine.detect_async(&Frame::new(sheet(), 0.0)).await;
        assert_eq!(first, Some(DetectionResult::none()));
        assert_eq!(engine.detector_name(), "classical");
        assert!(!engine.is_disabled());

        let second = engine.detect_async(&Frame::new(sheet(), 50.0)).await.unwrap();
        assert!(second.is_found());
    }

    #[tokio::test]
    async fn model_load_timeout_falls_back() {
        let config = DetectionConfig {
            model_load_timeout_ms: 20,
            ..DetectionConfig::default()
        };
        let engine = DetectionEngine::with_model_loader(&config, || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(Box::new(Flat) as Box<dyn SaliencyModel>)
        })
        .await;
        assert_eq!(engine.strategy(), Some(DetectionStrategy::Classical));
    }

    #[tokio::test]
    async fn model_load_error_falls_back() {
        let engine = DetectionEngine::with_model_loader(&DetectionConfig::default(), || {
            Err(ScanwerkError::ModelLoad("missing".into()))
        })
        .await;
        assert_eq!(engine.detector_name(), "classical");
    }

    #[tokio::test]
    async fn loaded_model_selects_saliency() {
        let engine = DetectionEngine::with_model_loader(&DetectionConfig::default(), || {
            Ok(Box::new(Flat) as Box<dyn SaliencyModel>)
        })
        .await;
        assert_eq!(engine.strategy(), Some(DetectionStrategy::Ml));
    }

    #[cfg(not(feature = "ml"))]
    #[tokio::test]
    async fn ml_strategy_without_runtime_uses_classical() {
        let config = ScannerConfig {
            strategy: DetectionStrategy::Ml,
            ..ScannerConfig::default()
        };
        let engine = DetectionEngine::new(&config).await;
        assert_eq!(engine.detector_name(), "classical");
    }

    #[test]
    fn slow_frames_reduce_resolution_once() {
        let reductions = Arc::new(AtomicUsize::new(0));
        let slow = Slow {
            reductions: Arc::clone(&reductions),
        };
        let mut engine = DetectionEngine::with_detector(Box::new(slow), &DetectionConfig::default());

        for _ in 0..TIMING_WINDOW - 1 {
            engine.record_frame_time(55.0);
        }
        assert_eq!(reductions.load(Ordering::SeqCst), 0);
        engine.record_frame_time(55.0);
        assert_eq!(reductions.load(Ordering::SeqCst), 1);

        for _ in 0..50 {
            engine.record_frame_time(80.0);
        }
        assert_eq!(reductions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fast_frames_keep_resolution() {
        let reductions = Arc::new(AtomicUsize::new(0));
        let slow = Slow {
            reductions: Arc::clone(&reductions),
        };
        let mut engine = DetectionEngine::with_detector(Box::new(slow), &DetectionConfig::default());
        for _ in 0..100 {
            engine.record_frame_time(12.0);
        }
        assert_eq!(reductions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_loop() {
        let config = manual_config();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);
        let mut source = StillImageSource::new(sheet(), 1000, 50.0);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let exit = engine
            .run(&mut source, &mut session, 1000, rx, |_| {})
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::Stopped);
    }

    #[tokio::test]
    async fn restarted_loop_needs_a_fresh_stability_window() {
        let config = ScannerConfig::default();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);

        // 450 ms of a steady sheet, then the camera goes away.
        let mut source = StillImageSource::new(sheet(), 10, 50.0);
        let exit = engine
            .run(&mut source, &mut session, 1000, no_stop(), |_| {})
            .await
            .unwrap();
        assert_eq!(exit, LoopExit::SourceExhausted);
        assert_eq!(*session.stability(), StabilizationState::default());

        // Long after, a single frame must not complete the old window.
        let mut source = ScriptedFrameSource::new([Frame::new(sheet(), 10_000.0)]);
        let mut captured = Vec::new();
        engine
            .run(&mut source, &mut session, 1000, no_stop(), |r| captured.push(r.captured))
            .await
            .unwrap();
        assert_eq!(captured, vec![None]);
        assert!(session.batch().is_empty());
        assert_eq!(*session.state(), SessionState::Capturing);
    }

    #[tokio::test]
    async fn stopped_loop_resets_the_stabilizer() {
        let config = manual_config();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);
        let mut source = StillImageSource::new(sheet(), 1000, 50.0);
        let (tx, rx) = watch::channel(false);

        let mut seen = 0;
        let exit = engine
            .run(&mut source, &mut session, 1000, rx, |_| {
                seen += 1;
                if seen == 5 {
                    let _ = tx.send(true);
                }
            })
            .await
            .unwrap();

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(seen, 5);
        assert_eq!(*session.stability(), StabilizationState::default());
    }

    #[tokio::test]
    async fn loop_requires_capturing() {
        let config = manual_config();
        let mut engine = DetectionEngine::new(&config).await;
        let mut session = ScanSession::new(&config);
        session.capture(&Frame::new(sheet(), 0.0)).unwrap();
        let mut source = StillImageSource::new(sheet(), 1, 50.0);
        let result = engine.run(&mut source, &mut session, 15, no_stop(), |_| {}).await;
        assert!(matches!(result, Err(ScanwerkError::InvalidTransition { .. })));
    }
}
