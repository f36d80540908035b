// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-capture — The capture flow of the Scanwerk document scanner.
//
// Turns a stream of per-frame detections into captured pages:
//
//   frames -> DetectionEngine -> Stabilizer -> ScanSession -> PageBatch
//                                                   |
//                                       finish -> CaptureSink
//
// The engine owns the detector and the frame loop; the session owns the
// state machine, the stabilizer and the batch.

pub mod batch;
pub mod engine;
pub mod session;
pub mod stabilizer;

pub use batch::{PageBatch, ScannedPage};
pub use engine::{DetectionEngine, FrameReport, LoopExit};
pub use session::{FrameUpdate, ScanSession, SessionState};
pub use stabilizer::{StabilizationState, Stabilizer};
