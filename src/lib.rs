//! Spatio-temporal visual grounding.
//!
//! Given a video, a frame window and a natural-language question, find the
//! object the question is about in every frame of the window and score the
//! result against annotated ground truth.
//!
//! # Pipeline
//!
//! 1. **Refine**: a language model reduces the question to a short
//!    referring phrase (`refine`).
//! 2. **Localize**: detect the phrase in the first frame, track it forward,
//!    and re-detect whenever the tracker loses it (`localize`).
//! 3. **Evaluate**: per-frame IoU against ground truth aligned by offset from
//!    the window start (`evaluate`).
//! 4. **Persist**: one JSON result per video (`storage`).
//!
//! `batch` runs the pipeline over a directory of videos with per-video
//! isolation, a wall-clock budget and cancellation.
//!
//! # Module Structure
//!
//! - `bbox`: corner and center box forms plus conversions
//! - `manifest`: task manifest, frame windows, ground-truth parsing
//! - `frame`, `ingest`: decoded frames and their sources (files, `stub://`)
//! - `detect`, `track`, `refine`: capability traits and built-in backends
//! - `registry`: named backend factories
//! - `result`, `storage`, `visualize`: output artifacts

pub mod batch;
pub mod bbox;
pub mod config;
pub mod detect;
pub mod error;
pub mod evaluate;
pub mod frame;
pub mod ingest;
pub mod localize;
pub mod manifest;
pub mod refine;
pub mod registry;
pub mod result;
pub mod storage;
pub mod track;
pub mod visualize;

pub use batch::{
    discover_videos, BatchOptions, BatchOrchestrator, BatchSummary, CancelToken, Capabilities,
    SkipReason, VideoOutcome, VideoReport,
};
pub use bbox::{to_center, to_corner, BoundingBox, CenterBox};
pub use config::BatchConfig;
pub use error::Error;
pub use evaluate::{compute_iou, evaluate_predictions, evaluate_video, VideoScore};
pub use frame::Frame;
pub use localize::{FrameTrack, LocalizationReport, Localizer, LocalizerState};
pub use manifest::{video_key_from_path, FrameWindow, Manifest, Task, TaskError};
pub use result::{PredictionMap, VideoResult};
pub use storage::{InMemoryResultStore, JsonDirResultStore, ResultStore};
