//! IoU scoring against ground truth.
//!
//! Ground truth is a dense list aligned to the window start: the entry for
//! frame `f` is `ground_truth[f - begin]`. A frame is scored only when it has
//! a prediction and an in-range, well-formed ground-truth box.

use std::collections::BTreeMap;

use crate::bbox::BoundingBox;
use crate::localize::FrameTrack;
use crate::manifest::Task;

/// Intersection over union of two boxes, in `[0, 1]`.
///
/// Zero-area unions score 0.
pub fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let iw = (i64::from(a.xmax().min(b.xmax())) - i64::from(a.xmin().max(b.xmin()))).max(0);
    let ih = (i64::from(a.ymax().min(b.ymax())) - i64::from(a.ymin().max(b.ymin()))).max(0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0 {
        return 0.0;
    }
    inter as f64 / union as f64
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VideoScore {
    /// Mean over scored frames; 0 when none were scored.
    pub average_iou: f64,
    pub per_frame: BTreeMap<u32, f64>,
}

impl VideoScore {
    pub fn scored_frames(&self) -> usize {
        self.per_frame.len()
    }
}

/// Score `(frame, prediction)` pairs against `task`'s ground truth.
pub fn evaluate_predictions<'a, I>(predictions: I, task: &Task) -> VideoScore
where
    I: IntoIterator<Item = (u32, Option<&'a BoundingBox>)>,
{
    let mut per_frame = BTreeMap::new();
    for (frame, predicted) in predictions {
        let Some(predicted) = predicted else {
            continue;
        };
        let Some(truth) = task.ground_truth_at(frame) else {
            continue;
        };
        per_frame.insert(frame, compute_iou(predicted, truth));
    }

    let average_iou = if per_frame.is_empty() {
        0.0
    } else {
        per_frame.values().sum::<f64>() / per_frame.len() as f64
    };
    VideoScore {
        average_iou,
        per_frame,
    }
}

pub fn evaluate_video(track: &FrameTrack, task: &Task) -> VideoScore {
    evaluate_predictions(track.iter(), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FrameWindow;

    fn bx(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> BoundingBox {
        BoundingBox::new(xmin, ymin, xmax, ymax).unwrap()
    }

    fn task(begin: u32, end: u32, ground_truth: Vec<Option<BoundingBox>>) -> Task {
        Task {
            video_id: "1".to_string(),
            window: FrameWindow::new(begin, end).unwrap(),
            query: "what is on the table?".to_string(),
            target_category: None,
            ground_truth,
        }
    }

    #[test]
    fn identical_symmetric_and_disjoint() {
        let a = bx(0, 0, 10, 10);
        let b = bx(5, 5, 15, 15);
        assert_eq!(compute_iou(&a, &a), 1.0);
        assert_eq!(compute_iou(&a, &b), compute_iou(&b, &a));
        assert_eq!(compute_iou(&a, &bx(20, 20, 30, 30)), 0.0);
        // touching edges do not overlap
        assert_eq!(compute_iou(&a, &bx(10, 0, 20, 10)), 0.0);
    }

    #[test]
    fn far_apart_boxes_at_coordinate_extremes() {
        let low = bx(i32::MIN, i32::MIN, i32::MIN + 10, i32::MIN + 10);
        let high = bx(i32::MAX - 10, i32::MAX - 10, i32::MAX, i32::MAX);
        assert_eq!(compute_iou(&low, &high), 0.0);
        assert_eq!(compute_iou(&high, &high), 1.0);
    }

    #[test]
    fn degenerate_boxes_score_zero() {
        let point = bx(3, 3, 3, 3);
        assert_eq!(compute_iou(&point, &point), 0.0);
    }

    #[test]
    fn window_scenario() {
        let gt = bx(0, 0, 10, 10);
        let task = task(10, 12, vec![Some(gt), Some(gt), Some(gt)]);
        let track = FrameTrack::from_boxes(10, vec![Some(gt), None, Some(bx(5, 5, 15, 15))]);

        let score = evaluate_video(&track, &task);
        assert_eq!(score.scored_frames(), 2);
        assert_eq!(score.per_frame[&10], 1.0);
        assert!(!score.per_frame.contains_key(&11));
        assert!((score.per_frame[&12] - 25.0 / 175.0).abs() < 1e-12);
        assert!((score.average_iou - (1.0 + 25.0 / 175.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_and_malformed_truth_are_excluded() {
        let gt = bx(0, 0, 10, 10);
        let task = task(10, 13, vec![Some(gt), None]);
        let preds = [(9, Some(&gt)), (10, Some(&gt)), (11, Some(&gt)), (12, Some(&gt))];
        let score = evaluate_predictions(preds, &task);
        assert_eq!(score.per_frame.keys().copied().collect::<Vec<_>>(), vec![10]);
        assert_eq!(score.average_iou, 1.0);
    }

    #[test]
    fn nothing_scored_averages_zero() {
        let task = task(0, 1, vec![Some(bx(0, 0, 1, 1))]);
        let score = evaluate_video(&FrameTrack::from_boxes(0, vec![None, None]), &task);
        assert_eq!(score.average_iou, 0.0);
        assert!(score.per_frame.is_empty());
    }
}
