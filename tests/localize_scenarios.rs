use std::time::Duration;

use video_grounding::detect::{
    DetectorSession, GroundingDetector, SalientRegionDetector, ScriptedDetection,
    ScriptedDetector,
};
use video_grounding::ingest::{SyntheticConfig, SyntheticSource};
use video_grounding::track::{
    ObjectTracker, ScriptedTracker, TemplateTracker, TemplateTrackerConfig, TrackerCall,
};
use video_grounding::{
    evaluate_video, BoundingBox, CancelToken, CenterBox, FrameWindow, Localizer, Manifest,
};
use video_grounding::localize::Localization;

fn small() -> SyntheticConfig {
    SyntheticConfig {
        width: 64,
        height: 48,
        square: 8,
        ..SyntheticConfig::default()
    }
}

fn localize(
    detector: Box<dyn GroundingDetector>,
    tracker: Box<dyn ObjectTracker>,
    window: FrameWindow,
    detect_timeout: Duration,
) -> Localization {
    let mut source = SyntheticSource::new(small(), window);
    let session = DetectorSession::spawn(detector, detect_timeout).expect("detector session");
    Localizer::new(session, tracker)
        .run(&mut source, window, "the bright square", &CancelToken::new())
        .expect("localize")
}

#[test]
fn detector_retries_until_found_then_tracker_takes_over() {
    let window = FrameWindow::new(10, 15).unwrap();
    let target = CenterBox::new(20, 20, 10, 10);
    let detector = ScriptedDetector::new(ScriptedDetection::Found(target))
        .on_frame(10, ScriptedDetection::NotFound)
        .on_frame(11, ScriptedDetection::Error);
    let detector_calls = detector.call_log();
    let tracker = ScriptedTracker::new();
    let tracker_calls = tracker.call_log();

    let out = localize(
        Box::new(detector),
        Box::new(tracker),
        window,
        Duration::from_secs(5),
    );

    assert_eq!(*detector_calls.lock().unwrap(), vec![10, 11, 12]);
    assert_eq!(
        *tracker_calls.lock().unwrap(),
        vec![
            TrackerCall::Init(12),
            TrackerCall::Update(13),
            TrackerCall::Update(14),
            TrackerCall::Update(15),
        ]
    );

    let expected = BoundingBox::new(15, 15, 25, 25).unwrap();
    let frames: Vec<(u32, Option<&BoundingBox>)> = out.track.iter().collect();
    assert_eq!(
        frames,
        vec![
            (10, None),
            (11, None),
            (12, Some(&expected)),
            (13, Some(&expected)),
            (14, Some(&expected)),
            (15, Some(&expected)),
        ]
    );
    assert_eq!(out.report.detector_calls, 3);
    assert_eq!(out.report.detector_failures, 1);
    assert_eq!(out.report.tracker_updates, 3);
    assert_eq!(out.report.tracker_losses, 0);
}

#[test]
fn slow_detection_is_absent_and_next_frame_recovers() {
    let window = FrameWindow::new(0, 2).unwrap();
    let target = CenterBox::new(20, 20, 10, 10);
    let detector = ScriptedDetector::new(ScriptedDetection::Found(target)).on_frame(
        0,
        ScriptedDetection::Delay(
            Duration::from_millis(250),
            Box::new(ScriptedDetection::Found(target)),
        ),
    );

    let out = localize(
        Box::new(detector),
        Box::new(ScriptedTracker::new()),
        window,
        Duration::from_millis(200),
    );

    assert_eq!(out.track.len(), 3);
    assert!(out.track.get(0).is_none());
    assert_eq!(out.track.found_count(), 2);
    assert_eq!(out.report.detector_timeouts, 1);
}

#[test]
fn every_window_frame_gets_exactly_one_entry() {
    for (begin, end) in [(0, 0), (3, 4), (7, 19)] {
        let window = FrameWindow::new(begin, end).unwrap();
        let detector = ScriptedDetector::new(ScriptedDetection::NotFound)
            .on_frame(end, ScriptedDetection::Found(CenterBox::new(8, 8, 4, 4)));
        let out = localize(
            Box::new(detector),
            Box::new(ScriptedTracker::new().lose_at(end + 1)),
            window,
            Duration::from_secs(5),
        );
        let indices: Vec<u32> = out.track.iter().map(|(f, _)| f).collect();
        assert_eq!(indices, (begin..=end).collect::<Vec<_>>());
        assert_eq!(out.track.found_count(), 1);
    }
}

#[test]
fn salient_detector_and_template_tracker_follow_synthetic_square() {
    let config = small();
    let window = FrameWindow::new(0, 5).unwrap();
    let out = localize(
        Box::new(SalientRegionDetector::new()),
        Box::new(TemplateTracker::new(TemplateTrackerConfig::default())),
        window,
        Duration::from_secs(5),
    );

    assert_eq!(out.report.detector_calls, 1);
    assert_eq!(out.report.tracker_losses, 0);
    for f in window.frames() {
        let (ox, oy) = config.square_origin(f);
        let (ox, oy, side) = (ox as i32, oy as i32, config.square as i32);
        let truth = BoundingBox::new(ox, oy, ox + side, oy + side).unwrap();
        assert_eq!(out.track.get(f), Some(&truth), "frame {f}");
    }

    let manifest = Manifest::from_json_str(
        r#"{"5": {
            "temp_gt": {"begin_fid": 0, "end_fid": 5},
            "sentence": {"description": "the bright square"},
            "target_bboxs": [
                [8, 20, 8, 8], [10, 20, 8, 8], [12, 20, 8, 8],
                [14, 20, 8, 8], [16, 20, 8, 8], [18, 20, 8, 8]
            ]
        }}"#,
    )
    .unwrap();
    let task = manifest.task("5").unwrap();
    let score = evaluate_video(&out.track, &task);
    assert_eq!(score.scored_frames(), 6);
    assert!((score.average_iou - 1.0).abs() < 1e-12);
}
