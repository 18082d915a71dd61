//! Frame sources.
//!
//! This module provides sources of decoded frames for one video:
//! - Local video files (feature: ingest-ffmpeg)
//! - Synthetic `stub://` videos (testing and demos)
//!
//! A source yields the frames of a `FrameWindow` in increasing index order.
//! `Ok(None)` means the stream ended before the window did; `Err` is an I/O
//! failure. Either way the caller stops reading that video.

pub mod file;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod synthetic;

use anyhow::Result;
use std::path::Path;

use crate::frame::Frame;
use crate::manifest::FrameWindow;

pub use file::{FileConfig, FileOpener, FileSource, FileStats};
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Sequential reader over one video's frame window.
pub trait FrameSource: Send {
    /// Next frame in the window, `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opens frame sources. Shared across workers; each call returns an
/// independent source.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path, window: FrameWindow) -> Result<Box<dyn FrameSource>>;
}
