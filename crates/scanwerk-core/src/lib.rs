// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — core types, geometry kernel, configuration and error
// definitions shared across all crates.

pub mod config;
pub mod error;
pub mod geometry;
pub mod hints;
pub mod types;

pub use config::ScannerConfig;
pub use error::{Result, ScanwerkError};
pub use hints::ScanHint;
pub use types::*;
