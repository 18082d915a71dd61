//! Per-video result artifact.
//!
//! JSON shape, keyed by video id in the result file:
//!
//! ```json
//! {
//!   "query": "...",
//!   "refined_query": "...",
//!   "pred_bboxs": { "10": {"xmin": 0, "ymin": 0, "xmax": 10, "ymax": 10}, "11": {} },
//!   "average_iou": 0.5,
//!   "frame_by_frame_iou": { "10": 1.0 }
//! }
//! ```
//!
//! An empty object in `pred_bboxs` means the target was not found.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::evaluate::{evaluate_predictions, VideoScore};
use crate::localize::FrameTrack;
use crate::manifest::Task;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Empty {}

#[derive(Deserialize)]
#[serde(untagged)]
enum Slot {
    Found(BoundingBox),
    Absent(Empty),
}

/// Frame index to prediction, absent frames included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredictionMap(BTreeMap<u32, Option<BoundingBox>>);

impl PredictionMap {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, frame: u32) -> Option<&BoundingBox> {
        self.0.get(&frame)?.as_ref()
    }

    pub fn found_count(&self) -> usize {
        self.0.values().filter(|b| b.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<&BoundingBox>)> + '_ {
        self.0.iter().map(|(f, b)| (*f, b.as_ref()))
    }
}

impl From<FrameTrack> for PredictionMap {
    fn from(track: FrameTrack) -> Self {
        Self(track.into_entries().collect())
    }
}

impl Serialize for PredictionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (frame, bbox) in &self.0 {
            let key = frame.to_string();
            match bbox {
                Some(bbox) => map.serialize_entry(&key, bbox)?,
                None => map.serialize_entry(&key, &Empty {})?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PredictionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<u32, Slot>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(frame, slot)| match slot {
                    Slot::Found(bbox) => (frame, Some(bbox)),
                    Slot::Absent(_) => (frame, None),
                })
                .collect(),
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoResult {
    pub query: String,
    pub refined_query: String,
    pub pred_bboxs: PredictionMap,
    #[serde(default)]
    pub average_iou: f64,
    #[serde(default)]
    pub frame_by_frame_iou: BTreeMap<u32, f64>,
}

impl VideoResult {
    /// Unscored result; takes ownership of the track.
    pub fn new(query: impl Into<String>, refined_query: impl Into<String>, track: FrameTrack) -> Self {
        Self {
            query: query.into(),
            refined_query: refined_query.into(),
            pred_bboxs: PredictionMap::from(track),
            average_iou: 0.0,
            frame_by_frame_iou: BTreeMap::new(),
        }
    }

    pub fn attach_score(&mut self, score: VideoScore) {
        self.average_iou = score.average_iou;
        self.frame_by_frame_iou = score.per_frame;
    }

    /// Recompute scores from `pred_bboxs`. Returns the new average.
    pub fn rescore(&mut self, task: &Task) -> f64 {
        let score = evaluate_predictions(self.pred_bboxs.iter(), task);
        self.attach_score(score);
        self.average_iou
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bx(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> BoundingBox {
        BoundingBox::new(xmin, ymin, xmax, ymax).unwrap()
    }

    #[test]
    fn absent_frames_serialize_as_empty_objects() {
        let track = FrameTrack::from_boxes(10, vec![Some(bx(0, 0, 10, 10)), None]);
        let result = VideoResult::new("what is red?", "the red cup", track);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value["pred_bboxs"],
            json!({"10": {"xmin": 0, "ymin": 0, "xmax": 10, "ymax": 10}, "11": {}})
        );
        assert_eq!(value["frame_by_frame_iou"], json!({}));
    }

    #[test]
    fn reads_back_written_results() {
        let raw = r#"{
            "query": "q",
            "refined_query": "p",
            "pred_bboxs": {"2": {}, "10": {"xmin": 1, "ymin": 2, "xmax": 3, "ymax": 4}},
            "average_iou": 0.25,
            "frame_by_frame_iou": {"10": 0.25}
        }"#;
        let result: VideoResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.pred_bboxs.len(), 2);
        assert_eq!(result.pred_bboxs.get(2), None);
        assert_eq!(result.pred_bboxs.get(10), Some(&bx(1, 2, 3, 4)));
        assert_eq!(result.frame_by_frame_iou[&10], 0.25);
        // numeric order, not string order
        let frames: Vec<u32> = result.pred_bboxs.iter().map(|(f, _)| f).collect();
        assert_eq!(frames, vec![2, 10]);
    }

    #[test]
    fn inverted_prediction_is_rejected() {
        let raw = r#"{"query": "q", "refined_query": "p",
            "pred_bboxs": {"1": {"xmin": 5, "ymin": 0, "xmax": 1, "ymax": 4}}}"#;
        assert!(serde_json::from_str::<VideoResult>(raw).is_err());
    }
}
