//! Local file frame source.
//!
//! This module provides `FileSource` for reading a frame window from a local
//! video file. The file source is responsible for:
//! - Opening local files only (no network URLs)
//! - Decoding frames in-memory to RGB24
//! - Skipping frames before the window and stopping after it
//!
//! `stub://` paths select the synthetic backend.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "ingest-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::{FrameSource, VideoOpener};
use crate::frame::Frame;
use crate::manifest::FrameWindow;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "sample_videos/video_32.mp4") or `stub://name`.
    pub path: PathBuf,
    pub window: FrameWindow,
    /// Shape of the synthetic video used for `stub://` paths.
    pub synthetic: SyntheticConfig,
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    frames_read: u64,
    path: PathBuf,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(Box<FfmpegFileSource>),
}

impl FileSource {
    pub fn open(config: FileConfig) -> Result<Self> {
        let display = config.path.to_string_lossy().to_string();
        if !is_local_file_path(&display) {
            return Err(anyhow!(
                "video input only supports local paths (no URL schemes): {}",
                display
            ));
        }
        if display.starts_with("stub://") {
            log::debug!("FileSource: opened {} (synthetic)", display);
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(
                    config.synthetic,
                    config.window,
                )),
                frames_read: 0,
                path: config.path,
            });
        }
        if !config.path.is_file() {
            return Err(anyhow!("video file not found: {}", display));
        }
        #[cfg(feature = "ingest-ffmpeg")]
        {
            let source = FfmpegFileSource::open(&config.path, config.window)?;
            Ok(Self {
                backend: FileBackend::Ffmpeg(Box::new(source)),
                frames_read: 0,
                path: config.path,
            })
        }
        #[cfg(not(feature = "ingest-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-ffmpeg feature",
                display
            ))
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        FileStats {
            frames_read: self.frames_read,
            path: self.path.clone(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame()?,
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame()?,
        };
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_read: u64,
    pub path: PathBuf,
}

/// Default `VideoOpener`: local files plus `stub://` synthetic videos.
#[derive(Clone, Debug, Default)]
pub struct FileOpener {
    pub synthetic: SyntheticConfig,
}

impl FileOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VideoOpener for FileOpener {
    fn open(&self, path: &Path, window: FrameWindow) -> Result<Box<dyn FrameSource>> {
        let source = FileSource::open(FileConfig {
            path: path.to_path_buf(),
            window,
            synthetic: self.synthetic.clone(),
        })?;
        Ok(Box::new(source))
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
