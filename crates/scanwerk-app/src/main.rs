// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — command-line document scanner.
//
// Entry point. Initialises logging, loads settings, and runs one of:
//   detect   find the document outline in a photo
//   correct  de-skew a photo with detected or given corners
//   scan     feed photos through the live capture flow into a directory

mod sink;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use scanwerk_bridge::{Frame, StillImageSource};
use scanwerk_capture::{DetectionEngine, LoopExit, ScanSession, SessionState};
use scanwerk_core::config::ScannerConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::hints::humanize_error;
use scanwerk_core::types::{CornerSet, DetectionStrategy, Point, Rotation};
use scanwerk_vision::{ImageProcessor, PerspectiveCorrector};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sink::DirectorySink;

/// Client-side document scanning on still photos.
#[derive(Parser)]
#[command(name = "scanwerk", version, about, long_about = None)]
struct Cli {
    /// JSON settings file; missing fields take their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Saliency model (.rten). Selects the saliency detector.
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the detected outline of a photo as JSON.
    Detect {
        image: PathBuf,
    },

    /// De-skew a photo into an upright page.
    Correct {
        image: PathBuf,

        /// Where to write the page (format from the extension).
        #[arg(short, long)]
        output: PathBuf,

        /// Normalized corners "x,y;x,y;x,y;x,y" in any order. Detected when omitted.
        #[arg(long, value_parser = parse_corners)]
        corners: Option<CornerSet>,

        /// Clockwise rotation applied after correction (0, 90, 180, 270).
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        rotate: i32,

        /// Bounding-box crop without de-skew.
        #[arg(long)]
        preview: bool,
    },

    /// Run photos through auto-capture and write the batch as JPEGs.
    Scan {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Output directory.
        #[arg(short, long)]
        out: PathBuf,

        /// Frames replayed per photo before falling back to a manual capture.
        #[arg(long, default_value_t = 60)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "scanwerk failed");
            let human = humanize_error(&err);
            eprintln!("{}\n{}", human.message, human.suggestion);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.model)?;
    match cli.command {
        Command::Detect { image } => detect(&config, &image).await,
        Command::Correct {
            image,
            output,
            corners,
            rotate,
            preview,
        } => correct(&config, &image, &output, corners, rotate, preview).await,
        Command::Scan { images, out, frames } => scan(&config, &images, &out, frames).await,
    }
}

fn load_config(path: Option<&Path>, model: Option<PathBuf>) -> Result<ScannerConfig> {
    let mut config = match path {
        Some(path) => ScannerConfig::from_json_file(path)?,
        None => ScannerConfig::default(),
    };
    if let Some(model) = model {
        config.strategy = DetectionStrategy::Ml;
        config.detection.model_path = Some(model);
    }
    config.validate()?;
    Ok(config)
}

/// Parse `"x,y;x,y;x,y;x,y"` into an ordered corner set.
fn parse_corners(text: &str) -> std::result::Result<CornerSet, String> {
    let points = text
        .split(';')
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("expected x,y but got {pair:?}"))?;
            let x: f64 = x.trim().parse().map_err(|e| format!("bad x in {pair:?}: {e}"))?;
            let y: f64 = y.trim().parse().map_err(|e| format!("bad y in {pair:?}: {e}"))?;
            Ok(Point::new(x, y))
        })
        .collect::<std::result::Result<Vec<_>, String>>()?;
    CornerSet::from_slice(&points).ok_or_else(|| format!("expected 4 corners, got {}", points.len()))
}

// -- Commands ------------------------------------------------------------------

async fn detect(config: &ScannerConfig, path: &Path) -> Result<()> {
    let image = ImageProcessor::open(path)?.into_rgba();
    let mut engine = DetectionEngine::new(config).await;
    let result = engine
        .detect_async(&Frame::new(image, 0.0))
        .await
        .ok_or_else(|| ScanwerkError::ImageError("detection failed on this photo".into()))?;

    let report = serde_json::json!({
        "image": path.display().to_string(),
        "detector": engine.detector_name(),
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn correct(
    config: &ScannerConfig,
    path: &Path,
    output: &Path,
    corners: Option<CornerSet>,
    rotate: i32,
    preview: bool,
) -> Result<()> {
    let rotation = Rotation::from_degrees(rotate)
        .ok_or_else(|| ScanwerkError::InvalidConfig(format!("rotation {rotate} is not a quarter turn")))?;
    let image = ImageProcessor::open(path)?.into_rgba();

    let corners = match corners {
        Some(corners) => corners,
        None => {
            let mut engine = DetectionEngine::new(config).await;
            let result = engine.detect_async(&Frame::new(image.clone(), 0.0)).await;
            result.and_then(|r| r.corners).ok_or_else(|| {
                ScanwerkError::Correction("no document found in the photo; pass --corners".into())
            })?
        }
    };
    debug!(?corners, "correcting");

    let corrector = PerspectiveCorrector::new(&config.correction);
    let page = if preview {
        corrector.crop_preview(&image, corners.points())?.into_image()
    } else {
        corrector.correct(&image, corners.points())?
    };

    let page = ImageProcessor::from_rgba(page).rotate(rotation);
    page.save(output)?;
    info!(output = %output.display(), width = page.width(), height = page.height(), "Page saved");
    Ok(())
}

async fn scan(config: &ScannerConfig, photos: &[PathBuf], out: &Path, frames: usize) -> Result<()> {
    let mut engine = DetectionEngine::new(config).await;
    let mut session = ScanSession::new(config);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let fps = config.capture.target_fps.max(1);
    let interval_ms = 1000.0 / f64::from(fps);

    for path in photos {
        let photo = ImageProcessor::open(path)?.into_rgba();
        let mut source = StillImageSource::new(photo.clone(), frames, interval_ms);
        let mut last_hint = None;

        let exit = engine
            .run(&mut source, &mut session, fps, stop_rx.clone(), |report| {
                if report.hint != last_hint {
                    if let Some(hint) = report.hint {
                        info!(photo = %path.display(), %hint, "hint");
                    }
                    last_hint = report.hint;
                }
            })
            .await?;

        match exit {
            LoopExit::LeftCapturing => {}
            LoopExit::Stopped => {
                warn!("scan interrupted, batch discarded");
                session.cancel();
                return Ok(());
            }
            LoopExit::SourceExhausted => {
                warn!(photo = %path.display(), "outline never settled, capturing manually");
                let last = frames as f64 * interval_ms;
                let frame = Frame::new(photo, last);
                // The loop dropped its lock on exit; detect once more so the
                // manual capture still carries the outline.
                if let Some(result) = engine.detect_async(&frame).await {
                    session.on_detection(&frame, result);
                }
                if session.capture(&frame)?.is_none() {
                    warn!(photo = %path.display(), "page limit reached, photo skipped");
                }
            }
        }

        if *session.state() == SessionState::Reviewing {
            session.confirm()?;
        }
    }

    let mut sink = DirectorySink::new(out, &config.capture);
    let count = session.finish_into(&mut sink)?;
    for path in sink.written() {
        println!("{}", path.display());
    }
    info!(pages = count, dir = %sink.dir().display(), "Scan complete");
    Ok(())
}
