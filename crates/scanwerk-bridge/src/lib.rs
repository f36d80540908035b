// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-bridge — Collaborator interfaces around the scanning core.
//
// The core never talks to a camera or a storage backend directly. Frames come
// in through `FrameSource`, finished pages leave through `CaptureSink`. The
// host shell provides the real implementations; `stub` carries the desktop
// and test ones.

pub mod stub;
pub mod traits;

pub use stub::{MemorySink, ScriptedFrameSource, StillImageSource, StubCamera};
pub use traits::{CaptureSink, FinishedPage, Frame, FrameSource};

/// The live camera for the target platform.
///
/// This crate ships no camera driver, so every build gets [`StubCamera`],
/// which reports `PlatformUnavailable` on the first frame request. A host with
/// a real preview stream implements [`FrameSource`] and hands that to the
/// engine instead.
pub fn platform_camera() -> Box<dyn FrameSource> {
    Box::new(StubCamera)
}
