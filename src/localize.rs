//! Detect, track, re-detect on failure.
//!
//! `Localizer` turns one video's frame window and referring phrase into a
//! `FrameTrack`: one entry per frame in `[begin, end]`, `None` where the
//! object was not found. Frames are processed strictly in order.
//!
//! States:
//! - `Uninitialized`: no tracker lock. Every frame runs the detector.
//! - `Active`: the tracker holds a lock. Every frame runs the tracker; when
//!   it loses the object the detector runs on that same frame (recovery) and
//!   either re-initializes the tracker or drops back to `Uninitialized`.
//!
//! Detector and tracker failures are frame-local. A frame that cannot be
//! read ends the run; the unread frames are recorded as absent.

use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::batch::CancelToken;
use crate::bbox::{BoundingBox, CenterBox};
use crate::detect::{DetectOutcome, DetectorSession};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::manifest::FrameWindow;
use crate::track::ObjectTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalizerState {
    Uninitialized,
    Active,
}

impl fmt::Display for LocalizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalizerState::Uninitialized => write!(f, "uninitialized"),
            LocalizerState::Active => write!(f, "active"),
        }
    }
}

/// Dense per-frame predictions for one window, indexed relative to `begin`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameTrack {
    begin: u32,
    boxes: Vec<Option<BoundingBox>>,
}

impl FrameTrack {
    pub fn new(begin: u32) -> Self {
        Self {
            begin,
            boxes: Vec::new(),
        }
    }

    /// Build from consecutive entries starting at `begin`.
    pub fn from_boxes(begin: u32, boxes: Vec<Option<BoundingBox>>) -> Self {
        Self { begin, boxes }
    }

    pub fn begin(&self) -> u32 {
        self.begin
    }

    /// Frame index the next `push` must carry.
    pub fn next_frame(&self) -> u32 {
        self.begin + self.boxes.len() as u32
    }

    /// Append the entry for the next frame. Entries must arrive in order
    /// with no gaps.
    pub fn push(&mut self, frame: u32, bbox: Option<BoundingBox>) -> Result<()> {
        let expected = self.next_frame();
        if frame != expected {
            return Err(anyhow!(
                "frame track expected frame {}, got {}",
                expected,
                frame
            ));
        }
        self.boxes.push(bbox);
        Ok(())
    }

    /// Append the entry for `next_frame()` and return that frame index.
    pub fn push_next(&mut self, bbox: Option<BoundingBox>) -> u32 {
        let frame = self.next_frame();
        self.boxes.push(bbox);
        frame
    }

    /// Prediction at `frame`; `None` when absent or outside the track.
    pub fn get(&self, frame: u32) -> Option<&BoundingBox> {
        let offset = frame.checked_sub(self.begin)? as usize;
        self.boxes.get(offset)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn found_count(&self) -> usize {
        self.boxes.iter().filter(|b| b.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<&BoundingBox>)> + '_ {
        let begin = self.begin;
        self.boxes
            .iter()
            .enumerate()
            .map(move |(i, b)| (begin + i as u32, b.as_ref()))
    }

    pub fn into_entries(self) -> impl Iterator<Item = (u32, Option<BoundingBox>)> {
        let begin = self.begin;
        self.boxes
            .into_iter()
            .enumerate()
            .map(move |(i, b)| (begin + i as u32, b))
    }
}

/// Counters for one localization run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalizationReport {
    pub frames_read: usize,
    pub detector_calls: usize,
    pub detector_timeouts: usize,
    pub detector_failures: usize,
    pub tracker_updates: usize,
    pub tracker_losses: usize,
    /// Detections that (re)started the tracker after the first frame.
    pub redetections: usize,
    /// Set when reading stopped before `end`.
    pub read_error: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocalizeError {
    #[error("cancelled before frame {frame}")]
    Cancelled { frame: u32 },
}

pub struct Localization {
    pub track: FrameTrack,
    pub report: LocalizationReport,
}

/// One video's detector session and tracker. Consumed by `run`, which
/// releases both when it returns.
pub struct Localizer {
    detector: DetectorSession,
    tracker: Box<dyn ObjectTracker>,
    state: LocalizerState,
    report: LocalizationReport,
}

impl Localizer {
    pub fn new(detector: DetectorSession, tracker: Box<dyn ObjectTracker>) -> Self {
        Self {
            detector,
            tracker,
            state: LocalizerState::Uninitialized,
            report: LocalizationReport::default(),
        }
    }

    pub fn state(&self) -> LocalizerState {
        self.state
    }

    pub fn run(
        mut self,
        source: &mut dyn FrameSource,
        window: FrameWindow,
        phrase: &str,
        cancel: &CancelToken,
    ) -> Result<Localization, LocalizeError> {
        let phrase: Arc<str> = Arc::from(phrase);
        let mut track = FrameTrack::new(window.begin());

        for f in window.frames() {
            if cancel.is_cancelled() {
                log::debug!("localization cancelled at frame {}", f);
                return Err(LocalizeError::Cancelled { frame: f });
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) if frame.index() == f => Arc::new(frame),
                Ok(Some(frame)) => {
                    self.stop_reading(format!(
                        "expected frame {}, source produced {}",
                        f,
                        frame.index()
                    ));
                    break;
                }
                Ok(None) => {
                    self.stop_reading(format!("stream ended before frame {}", f));
                    break;
                }
                Err(e) => {
                    self.stop_reading(format!("read frame {}: {:#}", f, e));
                    break;
                }
            };
            self.report.frames_read += 1;

            let bbox = self.step(frame, &phrase);
            let recorded = track.push_next(bbox);
            debug_assert_eq!(recorded, f);
        }

        while track.len() < window.len() {
            track.push_next(None);
        }

        Ok(Localization {
            track,
            report: self.report,
        })
    }

    fn stop_reading(&mut self, reason: String) {
        log::warn!("{}; remaining frames recorded as absent", reason);
        self.report.read_error = Some(reason);
    }

    /// Process one frame and return its corner-form prediction.
    fn step(&mut self, frame: Arc<Frame>, phrase: &Arc<str>) -> Option<BoundingBox> {
        if self.state == LocalizerState::Active {
            self.report.tracker_updates += 1;
            match self.tracker.update(&frame) {
                Ok(Some(center)) => match center.to_corner() {
                    Ok(corner) => return Some(corner),
                    Err(e) => log::debug!("frame {}: tracker box rejected: {}", frame.index(), e),
                },
                Ok(None) => {}
                Err(e) => log::debug!("frame {}: tracker update failed: {:#}", frame.index(), e),
            }
            self.report.tracker_losses += 1;
        }

        let is_first = self.report.frames_read == 1;
        match self.detect(&frame, phrase) {
            Some((center, corner)) => {
                match self.tracker.init(&frame, center) {
                    Ok(()) => {
                        self.state = LocalizerState::Active;
                        if !is_first {
                            self.report.redetections += 1;
                        }
                    }
                    Err(e) => {
                        log::debug!("frame {}: tracker init failed: {:#}", frame.index(), e);
                        self.state = LocalizerState::Uninitialized;
                    }
                }
                Some(corner)
            }
            None => {
                self.state = LocalizerState::Uninitialized;
                None
            }
        }
    }

    fn detect(&mut self, frame: &Arc<Frame>, phrase: &Arc<str>) -> Option<(CenterBox, BoundingBox)> {
        self.report.detector_calls += 1;
        match self.detector.detect(Arc::clone(frame), Arc::clone(phrase)) {
            DetectOutcome::Found(center) => match center.to_corner() {
                Ok(corner) => Some((center, corner)),
                Err(e) => {
                    log::debug!("frame {}: detector box rejected: {}", frame.index(), e);
                    None
                }
            },
            DetectOutcome::NotFound => None,
            DetectOutcome::Failed(e) => {
                self.report.detector_failures += 1;
                log::debug!("frame {}: detector failed: {}", frame.index(), e);
                None
            }
            DetectOutcome::TimedOut => {
                self.report.detector_timeouts += 1;
                log::debug!("frame {}: detector timed out", frame.index());
                None
            }
        }
    }
}
