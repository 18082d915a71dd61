//! Batch orchestration.
//!
//! Every video in the input directory runs the full pipeline in isolation:
//! resolve task, open video, refine query, localize, score, persist. A
//! video's failure is contained to a `SkipReason`; only a missing input
//! directory or manifest is fatal, and that is checked before the batch
//! starts.
//!
//! Videos are handed out to a bounded worker pool through a shared queue.
//! Each worker runs one video at a time on a detached thread and waits at
//! most the per-video budget. On timeout the worker cancels that video's
//! token (the localizer notices before its next frame, releasing its
//! tracker and detector session) and moves on. Results are persisted by the
//! worker, never by the timed-out thread, so an abandoned video cannot
//! write output late.

use std::collections::VecDeque;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::{DetectorSession, GroundingDetector};
use crate::evaluate::evaluate_video;
use crate::ingest::VideoOpener;
use crate::localize::{LocalizationReport, LocalizeError, Localizer};
use crate::manifest::{video_key_from_path, Manifest, Task, TaskError};
use crate::refine::{refine_with_timeout, QueryRefiner, RefineOutcome};
use crate::registry::Factory;
use crate::result::VideoResult;
use crate::storage::ResultStore;
use crate::track::ObjectTracker;
use crate::visualize::{OverlayJob, Visualizer};

/// Cooperative cancellation flag. A child token also observes its parent.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by either `self` or its own `cancel`.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .map(|p| p.load(Ordering::SeqCst))
                .unwrap_or(false)
    }
}

/// Why a video produced no result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SkipReason {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("file name has no numeric video key")]
    NoVideoKey,

    #[error("query refinement failed: {0}")]
    RefinementFailed(String),

    #[error("exceeded per-video budget of {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("unreadable video: {0}")]
    Unreadable(String),

    #[error("{0}")]
    Failed(String),

    #[error("batch cancelled")]
    Cancelled,
}

/// Per-video collaborators, shared read-only by all workers. Factories
/// build fresh detector/tracker instances for every video.
pub struct Capabilities {
    pub refiner: Arc<dyn QueryRefiner>,
    pub detector: Factory<dyn GroundingDetector>,
    pub tracker: Factory<dyn ObjectTracker>,
    pub opener: Arc<dyn VideoOpener>,
    pub visualizer: Option<Arc<dyn Visualizer>>,
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub workers: usize,
    pub video_timeout: Duration,
    pub detect_timeout: Duration,
    pub refine_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            video_timeout: Duration::from_secs(300),
            detect_timeout: Duration::from_secs(10),
            refine_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum VideoOutcome {
    Completed {
        average_iou: f64,
        frames: usize,
        found: usize,
    },
    Skipped(SkipReason),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoReport {
    /// Manifest key, or the file name when no key could be derived.
    pub video_id: String,
    pub path: PathBuf,
    pub outcome: VideoOutcome,
    pub elapsed: Duration,
}

impl VideoReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, VideoOutcome::Completed { .. })
    }
}

impl fmt::Display for VideoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            VideoOutcome::Completed {
                average_iou,
                frames,
                found,
            } => write!(
                f,
                "video {}: completed, {}/{} frames found, average IoU {:.4}",
                self.video_id, found, frames, average_iou
            ),
            VideoOutcome::Skipped(reason) => {
                write!(f, "video {}: skipped ({})", self.video_id, reason)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoSummaryLine {
    pub video: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub average_iou: Option<f64>,
}

/// Batch-level totals, persisted as `batch_summary.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Mean of per-video average IoU over completed videos.
    pub mean_average_iou: f64,
    pub videos: Vec<VideoSummaryLine>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[VideoReport]) -> Self {
        let mut videos = Vec::with_capacity(reports.len());
        let mut scores = Vec::new();
        for report in reports {
            match &report.outcome {
                VideoOutcome::Completed { average_iou, .. } => {
                    scores.push(*average_iou);
                    videos.push(VideoSummaryLine {
                        video: report.video_id.clone(),
                        status: "completed".to_string(),
                        reason: None,
                        average_iou: Some(*average_iou),
                    });
                }
                VideoOutcome::Skipped(reason) => videos.push(VideoSummaryLine {
                    video: report.video_id.clone(),
                    status: "skipped".to_string(),
                    reason: Some(reason.to_string()),
                    average_iou: None,
                }),
            }
        }
        let mean_average_iou = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };
        Self {
            attempted: reports.len(),
            completed: scores.len(),
            skipped: reports.len() - scores.len(),
            mean_average_iou,
            videos,
        }
    }
}

/// Sorted `*.mp4` files in `dir`. A missing directory is an error.
pub fn discover_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(anyhow!("video directory {} does not exist", dir.display()));
    }
    let mut videos = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_mp4 = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mp4"))
            .unwrap_or(false);
        if is_mp4 && path.is_file() {
            videos.push(path);
        }
    }
    videos.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(videos)
}

struct Completed {
    result: VideoResult,
    report: LocalizationReport,
    frames: usize,
}

pub struct BatchOrchestrator {
    manifest: Arc<Manifest>,
    caps: Arc<Capabilities>,
    store: Arc<dyn ResultStore>,
    options: BatchOptions,
    cancel: CancelToken,
    visual_output: Option<PathBuf>,
    visual_jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchOrchestrator {
    pub fn new(
        manifest: Arc<Manifest>,
        caps: Capabilities,
        store: Arc<dyn ResultStore>,
        options: BatchOptions,
    ) -> Self {
        Self {
            manifest,
            caps: Arc::new(caps),
            store,
            options,
            cancel: CancelToken::new(),
            visual_output: None,
            visual_jobs: Mutex::new(Vec::new()),
        }
    }

    /// Use an externally owned token (e.g. wired to Ctrl-C).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Write annotated frames under `dir` when a visualizer is configured.
    pub fn with_visual_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.visual_output = Some(dir.into());
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn run(&self, videos: &[PathBuf]) -> Result<BatchSummary> {
        self.run_with_progress(videos, &|_: &VideoReport| {})
    }

    /// Process `videos`, calling `on_video` as each one finishes. Reports
    /// keep input order regardless of worker scheduling.
    pub fn run_with_progress(
        &self,
        videos: &[PathBuf],
        on_video: &(dyn Fn(&VideoReport) + Sync),
    ) -> Result<BatchSummary> {
        let queue: Mutex<VecDeque<(usize, &PathBuf)>> =
            Mutex::new(videos.iter().enumerate().collect());
        let slots: Mutex<Vec<Option<VideoReport>>> = Mutex::new(vec![None; videos.len()]);
        let workers = self.options.workers.max(1).min(videos.len().max(1));
        log::info!(
            "processing {} videos with {} worker(s), budget {}s per video",
            videos.len(),
            workers,
            self.options.video_timeout.as_secs()
        );

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, path)) = next else {
                        break;
                    };
                    let report = self.process_video(path);
                    log::info!("{}", report);
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[index] =
                        Some(report.clone());
                    on_video(&report);
                });
            }
        });

        self.join_visual_jobs();

        let reports: Vec<VideoReport> = slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(videos)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    let reason = SkipReason::Failed("worker exited before reporting".to_string());
                    log::warn!("{}: {}", path.display(), reason);
                    VideoReport {
                        video_id: video_key_from_path(path).unwrap_or_else(|| file_label(path)),
                        path: path.clone(),
                        outcome: VideoOutcome::Skipped(reason),
                        elapsed: Duration::ZERO,
                    }
                })
            })
            .collect();
        let summary = BatchSummary::from_reports(&reports);
        log::info!(
            "batch finished: {} attempted, {} completed, {} skipped, mean IoU {:.4}",
            summary.attempted,
            summary.completed,
            summary.skipped,
            summary.mean_average_iou
        );
        self.store
            .persist_summary(&summary)
            .context("persist batch summary")?;
        Ok(summary)
    }

    fn process_video(&self, path: &Path) -> VideoReport {
        let started = Instant::now();
        let (video_id, outcome) = match video_key_from_path(path) {
            None => (file_label(path), VideoOutcome::Skipped(SkipReason::NoVideoKey)),
            Some(key) => {
                // a panic on this worker must not take the rest of the batch down
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                    self.run_video(&key, path)
                })) {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(reason)) => VideoOutcome::Skipped(reason),
                    Err(payload) => VideoOutcome::Skipped(SkipReason::Failed(format!(
                        "panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };
                (key, outcome)
            }
        };

        if let VideoOutcome::Skipped(reason) = &outcome {
            log::warn!("video {}: skipping: {}", video_id, reason);
        }
        VideoReport {
            video_id,
            path: path.to_path_buf(),
            outcome,
            elapsed: started.elapsed(),
        }
    }

    fn run_video(&self, key: &str, path: &Path) -> Result<VideoOutcome, SkipReason> {
        if self.cancel.is_cancelled() {
            return Err(SkipReason::Cancelled);
        }
        let task = self.manifest.task(key)?;

        let token = self.cancel.child();
        let (tx, rx) = mpsc::channel();
        {
            let caps = Arc::clone(&self.caps);
            let options = self.options.clone();
            let task = task.clone();
            let path = path.to_path_buf();
            let token = token.clone();
            thread::Builder::new()
                .name(format!("video-{key}"))
                .spawn(move || {
                    let _ = tx.send(run_pipeline(&caps, &options, &task, &path, &token));
                })
                .map_err(|e| SkipReason::Failed(format!("spawn video thread: {e}")))?;
        }

        let done = match rx.recv_timeout(self.options.video_timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                return Err(SkipReason::TimedOut(self.options.video_timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SkipReason::Failed("video thread panicked".to_string()));
            }
        };

        self.store
            .persist(key, &done.result)
            .map_err(|e| SkipReason::Failed(format!("persist result: {e:#}")))?;

        let found = done.result.pred_bboxs.found_count();
        log::info!(
            "video {}: {} frames, {} found, {} not found, {} detector calls ({} timed out, {} failed), {} tracker losses",
            key,
            done.frames,
            found,
            done.frames - found,
            done.report.detector_calls,
            done.report.detector_timeouts,
            done.report.detector_failures,
            done.report.tracker_losses
        );

        let outcome = VideoOutcome::Completed {
            average_iou: done.result.average_iou,
            frames: done.frames,
            found,
        };
        self.spawn_visualization(key, path, &task, done.result);
        Ok(outcome)
    }

    fn spawn_visualization(&self, key: &str, path: &Path, task: &Task, result: VideoResult) {
        let (Some(visualizer), Some(output_dir)) =
            (self.caps.visualizer.clone(), self.visual_output.clone())
        else {
            return;
        };
        let job = OverlayJob {
            video_id: key.to_string(),
            begin: task.window.begin(),
            predictions: result.pred_bboxs,
            ground_truth: task.ground_truth.clone(),
            output_dir,
        };
        let opener = Arc::clone(&self.caps.opener);
        let window = task.window;
        let path = path.to_path_buf();

        let spawned = thread::Builder::new()
            .name(format!("visualize-{key}"))
            .spawn(move || {
                let rendered = opener
                    .open(&path, window)
                    .and_then(|mut source| visualizer.render(&job, source.as_mut()));
                match rendered {
                    Ok(n) => log::info!(
                        "video {}: wrote {} annotated frames to {}",
                        job.video_id,
                        n,
                        job.frames_dir().display()
                    ),
                    Err(e) => log::warn!("video {}: visualization failed: {:#}", job.video_id, e),
                }
            });
        match spawned {
            Ok(handle) => {
                self.visual_jobs
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
            }
            Err(e) => log::warn!("video {}: visualization not started: {}", key, e),
        }
    }

    fn join_visual_jobs(&self) {
        let jobs = std::mem::take(
            &mut *self
                .visual_jobs
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if !jobs.is_empty() {
            log::info!("waiting for {} visualization job(s)", jobs.len());
        }
        for job in jobs {
            if job.join().is_err() {
                log::warn!("visualization thread panicked");
            }
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Open, refine, localize, and score one video.
fn run_pipeline(
    caps: &Capabilities,
    options: &BatchOptions,
    task: &Task,
    path: &Path,
    token: &CancelToken,
) -> Result<Completed, SkipReason> {
    let mut source = caps
        .opener
        .open(path, task.window)
        .map_err(|e| SkipReason::Unreadable(format!("{e:#}")))?;

    let phrase = match refine_with_timeout(
        Arc::clone(&caps.refiner),
        path,
        &task.query,
        options.refine_timeout,
    ) {
        RefineOutcome::Phrase(phrase) => phrase,
        RefineOutcome::Empty => {
            return Err(SkipReason::RefinementFailed("empty phrase".to_string()))
        }
        RefineOutcome::Failed(e) => return Err(SkipReason::RefinementFailed(e)),
        RefineOutcome::TimedOut => {
            return Err(SkipReason::RefinementFailed(format!(
                "no answer within {}s",
                options.refine_timeout.as_secs_f64()
            )))
        }
    };
    log::info!("video {}: '{}' -> '{}'", task.video_id, task.query, phrase);

    if token.is_cancelled() {
        return Err(SkipReason::Cancelled);
    }

    let detector = (caps.detector)().map_err(|e| SkipReason::Failed(format!("detector: {e:#}")))?;
    let session = DetectorSession::spawn(detector, options.detect_timeout)
        .map_err(|e| SkipReason::Failed(format!("{e:#}")))?;
    let tracker = (caps.tracker)().map_err(|e| SkipReason::Failed(format!("tracker: {e:#}")))?;

    let localization = Localizer::new(session, tracker)
        .run(source.as_mut(), task.window, &phrase, token)
        .map_err(|e| match e {
            LocalizeError::Cancelled { .. } => SkipReason::Cancelled,
        })?;
    if let Some(err) = &localization.report.read_error {
        log::warn!("video {}: {}", task.video_id, err);
    }

    let score = evaluate_video(&localization.track, task);
    let frames = localization.track.len();
    let mut result = VideoResult::new(task.query.clone(), phrase, localization.track);
    result.attach_score(score);
    Ok(Completed {
        result,
        report: localization.report,
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_token_observes_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let sibling = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn summary_counts_and_mean() {
        let report = |id: &str, outcome| VideoReport {
            video_id: id.to_string(),
            path: PathBuf::from(format!("video_{id}.mp4")),
            outcome,
            elapsed: Duration::ZERO,
        };
        let summary = BatchSummary::from_reports(&[
            report(
                "1",
                VideoOutcome::Completed {
                    average_iou: 0.5,
                    frames: 3,
                    found: 2,
                },
            ),
            report("2", VideoOutcome::Skipped(SkipReason::NoVideoKey)),
            report(
                "3",
                VideoOutcome::Completed {
                    average_iou: 1.0,
                    frames: 1,
                    found: 1,
                },
            ),
        ]);
        assert_eq!((summary.attempted, summary.completed, summary.skipped), (3, 2, 1));
        assert!((summary.mean_average_iou - 0.75).abs() < 1e-12);
        assert_eq!(summary.videos[1].status, "skipped");
    }

    #[test]
    fn discovery_sorts_mp4_and_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video_10.mp4", "video_2.MP4", "notes.txt", "video_1.mp4"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = discover_videos(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["video_1.mp4", "video_10.mp4", "video_2.MP4"]);
        assert!(discover_videos(&dir.path().join("missing")).is_err());
    }
}
