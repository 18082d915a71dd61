//! Task manifest loading.
//!
//! The manifest is a JSON object keyed by video identifier. Each entry carries
//! the frame window (`temp_gt.begin_fid` / `temp_gt.end_fid`), the query
//! (`sentence.description`), an optional `target_category`, and the
//! ground-truth box sequence (`target_bboxs`), one box per frame starting at
//! `begin_fid`.
//!
//! Entries are kept as raw JSON until a video asks for its task, so one bad
//! entry only affects that video.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::bbox::BoundingBox;
use crate::error::Error;

/// Inclusive frame range `[begin, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameWindow {
    begin: u32,
    end: u32,
}

impl FrameWindow {
    pub fn new(begin: u32, end: u32) -> Result<Self, Error> {
        if begin > end {
            return Err(Error::InvalidWindow { begin, end });
        }
        Ok(Self { begin, end })
    }

    #[inline]
    pub fn begin(&self) -> u32 {
        self.begin
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of frames in the window (`end - begin + 1`).
    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.begin) as usize + 1
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn contains(&self, frame: u32) -> bool {
        (self.begin..=self.end).contains(&frame)
    }

    #[inline]
    pub fn frames(&self) -> RangeInclusive<u32> {
        self.begin..=self.end
    }
}

/// Ground-truth box as it appears in the manifest.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GroundTruthShape {
    /// `{"xmin": .., "ymin": .., "xmax": .., "ymax": ..}`
    Corners {
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
    },
    /// `[x, y, w, h]` with `(x, y)` the top-left corner.
    Xywh([f64; 4]),
}

impl GroundTruthShape {
    /// Normalize to corner form. Fractional coordinates truncate toward zero.
    pub fn to_box(&self) -> Result<BoundingBox, Error> {
        match *self {
            GroundTruthShape::Corners {
                xmin,
                ymin,
                xmax,
                ymax,
            } => BoundingBox::new(xmin as i32, ymin as i32, xmax as i32, ymax as i32),
            GroundTruthShape::Xywh([x, y, w, h]) => {
                let (x, y) = (x as i32, y as i32);
                let (w, h) = (w as i32, h as i32);
                BoundingBox::from_xywh(x, y, w, h)
            }
        }
    }
}

/// Parse one `target_bboxs` element.
pub fn parse_ground_truth_box(value: &Value) -> Result<BoundingBox, Error> {
    let shape: GroundTruthShape = serde_json::from_value(value.clone())
        .map_err(|_| Error::UnrecognizedBoxShape(abbreviate(value)))?;
    shape.to_box()
}

fn abbreviate(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 64 {
        let mut cut = 64;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push('…');
    }
    text
}

/// One video's query and ground truth. Immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub video_id: String,
    pub window: FrameWindow,
    pub query: String,
    pub target_category: Option<String>,
    /// Dense, indexed relative to `window.begin()`. Malformed entries keep
    /// their slot as `None` so later offsets stay aligned.
    pub ground_truth: Vec<Option<BoundingBox>>,
}

impl Task {
    /// Ground truth for an absolute frame index, aligned by offset from `begin`.
    pub fn ground_truth_at(&self, frame: u32) -> Option<&BoundingBox> {
        let offset = frame.checked_sub(self.window.begin())? as usize;
        self.ground_truth.get(offset)?.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("no manifest entry for video '{0}'")]
    Missing(String),

    #[error("task for video '{video_id}' is incomplete: missing {missing}")]
    Incomplete { video_id: String, missing: String },

    #[error("task for video '{video_id}' is invalid: {source}")]
    Invalid {
        video_id: String,
        #[source]
        source: Error,
    },
}

/// Parsed task manifest.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    entries: BTreeMap<String, Value>,
}

impl Manifest {
    /// Load the manifest file. Any failure here is fatal for a batch.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        match value {
            Value::Object(map) => Ok(Self {
                entries: map.into_iter().collect(),
            }),
            other => Err(anyhow!(
                "manifest must be a JSON object keyed by video id, found {}",
                json_kind(&other)
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.entries.contains_key(video_id)
    }

    /// Video identifiers in sorted order.
    pub fn video_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Resolve the task record for a video.
    pub fn task(&self, video_id: &str) -> Result<Task, TaskError> {
        let entry = self
            .entries
            .get(video_id)
            .ok_or_else(|| TaskError::Missing(video_id.to_string()))?;

        let begin = frame_field(entry, "/temp_gt/begin_fid");
        let end = frame_field(entry, "/temp_gt/end_fid");
        let query = entry
            .pointer("/sentence/description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty());
        let boxes = entry
            .get("target_bboxs")
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty());

        let mut missing = Vec::new();
        if begin.is_none() {
            missing.push("temp_gt.begin_fid");
        }
        if end.is_none() {
            missing.push("temp_gt.end_fid");
        }
        if query.is_none() {
            missing.push("sentence.description");
        }
        if boxes.is_none() {
            missing.push("target_bboxs");
        }
        let (Some(begin), Some(end), Some(query), Some(boxes)) = (begin, end, query, boxes) else {
            return Err(TaskError::Incomplete {
                video_id: video_id.to_string(),
                missing: missing.join(", "),
            });
        };

        let window = FrameWindow::new(begin, end).map_err(|source| TaskError::Invalid {
            video_id: video_id.to_string(),
            source,
        })?;

        let ground_truth = boxes
            .iter()
            .enumerate()
            .map(|(offset, value)| match parse_ground_truth_box(value) {
                Ok(bbox) => Some(bbox),
                Err(e) => {
                    log::warn!(
                        "video {}: ground truth for frame {} skipped: {}",
                        video_id,
                        u64::from(begin) + offset as u64,
                        e
                    );
                    None
                }
            })
            .collect();

        let target_category = entry
            .get("target_category")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Task {
            video_id: video_id.to_string(),
            window,
            query: query.to_string(),
            target_category,
            ground_truth,
        })
    }
}

fn frame_field(entry: &Value, pointer: &str) -> Option<u32> {
    entry
        .pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Manifest key for a video file: the first run of digits in its file name.
///
/// `video_32.mp4` → `32`. Returns `None` when the name has no digits.
pub fn video_key_from_path(path: &Path) -> Option<String> {
    static DIGITS: OnceLock<Option<Regex>> = OnceLock::new();
    let re = DIGITS.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());
    re.find(&name).map(|m| m.as_str().to_string())
}
