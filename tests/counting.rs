use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use roi_counter::{
    backend::{CameraConfig, ConfigSource, ReportSink},
    capture::{FrameSource, SourceOpener},
    preview::FrameSlot,
    visualization::{Annotate, Overlay},
    BBox, CentroidTracker, CrossingDetector, CrossingEvent, Detection, Detector, Error, LoopState,
    Pipeline, PipelineSettings, Report, Result, Roi,
};

fn point(x: f32, y: f32) -> BBox {
    BBox::new(x, y, x, y)
}

fn square() -> Roi {
    Roi::from_pairs(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]])
}

#[test]
fn test_nearest_track_wins_and_far_track_ages() {
    let mut tracker = CentroidTracker::new(20, 80.0);
    tracker.update(&[point(100.0, 0.0), point(305.0, 0.0)]);

    let tracks = tracker.update(&[point(105.0, 0.0)]);
    assert_eq!(tracks.len(), 2);

    let a = &tracks[0];
    assert_eq!(a.id, 1);
    assert_eq!(a.disappeared, 0);
    assert_relative_eq!(a.centroid.x, 105.0);

    let b = &tracks[1];
    assert_eq!(b.id, 2);
    assert_eq!(b.disappeared, 1);
}

#[test]
fn test_resident_track_leaving_emits_single_exit() {
    let roi = square();
    let mut tracker = CentroidTracker::new(20, 80.0);
    let mut crossings = CrossingDetector::new();

    tracker.update(&[point(5.0, 5.0)]);
    tracker.tracks_mut()[0].in_roi = true;

    let mut per_frame = Vec::new();
    for (x, y) in [(5.0, 5.0), (5.0, 5.0), (15.0, 5.0)] {
        let tracks = tracker.update(&[point(x, y)]);
        per_frame.push(crossings.evaluate(tracks, Some(&roi)));
    }

    assert!(per_frame[0].is_empty());
    assert!(per_frame[1].is_empty());
    assert_eq!(per_frame[2], vec![CrossingEvent::Exit { track_id: 1 }]);
}

#[test]
fn test_expired_id_is_never_reused() {
    let mut tracker = CentroidTracker::new(2, 80.0);
    tracker.update(&[point(5.0, 5.0)]);
    for _ in 0..3 {
        tracker.update(&[]);
    }
    assert!(tracker.tracks().is_empty());

    let tracks = tracker.update(&[point(5.0, 5.0)]);
    assert_eq!(tracks[0].id, 2);
}

// Scripted end-to-end run through the loop.

#[derive(Debug, Clone)]
struct Frame(Vec<BBox>);

impl Annotate for Frame {
    fn annotate(&mut self, _overlay: &Overlay<'_>) -> Result<()> {
        Ok(())
    }
}

type Script = Rc<RefCell<VecDeque<Option<Frame>>>>;

struct ScriptedSource(Script);

impl FrameSource for ScriptedSource {
    type Frame = Frame;

    fn read_frame(&mut self) -> Result<Frame> {
        self.0
            .borrow_mut()
            .pop_front()
            .flatten()
            .ok_or_else(|| Error::Capture("stream dropped".to_string()))
    }
}

struct ScriptedOpener(Script);

impl SourceOpener for ScriptedOpener {
    type Source = ScriptedSource;

    fn open(&mut self, _url: &str) -> Result<ScriptedSource> {
        Ok(ScriptedSource(Rc::clone(&self.0)))
    }
}

struct BoxesAsDetections;

impl Detector<Frame> for BoxesAsDetections {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(frame.0.iter().map(|b| Detection::new(*b, 0.8, 0)).collect())
    }
}

/// Serves one camera config and records every report it receives.
struct Recorder {
    config: CameraConfig,
    reports: Rc<RefCell<Vec<Report>>>,
}

impl ConfigSource for Recorder {
    fn camera_config(&mut self) -> Result<CameraConfig> {
        Ok(self.config.clone())
    }
}

impl ReportSink for Recorder {
    fn send_report(&mut self, report: &Report) -> Result<()> {
        self.reports.borrow_mut().push(report.clone());
        Ok(())
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        camera_id: 7,
        static_stream_url: None,
        default_roi: Roi::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]),
        max_disappeared: 20,
        max_distance: 80.0,
        post_interval: Duration::from_secs(3),
        config_refresh: Duration::from_secs(30),
        no_source_delay: Duration::from_secs(5),
        reconnect_delay: Duration::from_secs(3),
        read_failure_delay: Duration::from_secs(1),
        preview_overlay: false,
    }
}

#[test]
fn test_scripted_run_reports_crossings_per_window() {
    let script: Script = Rc::default();
    let reports = Rc::new(RefCell::new(Vec::new()));
    let recorder = Recorder {
        config: CameraConfig {
            roi: Some(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]),
            stream_url: Some("rtsp://cam/7".to_string()),
        },
        reports: Rc::clone(&reports),
    };
    let preview = Arc::new(FrameSlot::new());
    let start = Instant::now();
    let mut pipeline = Pipeline::new(
        settings(),
        ScriptedOpener(Rc::clone(&script)),
        BoxesAsDetections,
        recorder,
        Arc::clone(&preview),
        start,
    );
    let at = |ms: u64| start + Duration::from_millis(ms);

    // two people: one walks in and back out, one walks in and stays
    script.borrow_mut().extend([
        Some(Frame(vec![point(20.0, 5.0), point(5.0, -30.0)])),
        Some(Frame(vec![point(2.0, 8.0), point(5.0, -30.0)])),
        Some(Frame(vec![point(1.0, 9.0), point(8.0, 1.0)])),
        Some(Frame(vec![point(-6.0, 9.0), point(8.0, 2.0)])),
        None,
    ]);

    pipeline.step(at(0)); // config fetched, stream URL known
    assert_eq!(pipeline.state(), LoopState::Connecting);
    pipeline.step(at(10));
    assert_eq!(pipeline.state(), LoopState::Streaming);
    for i in 1..=4 {
        pipeline.step(at(10 + i * 100));
    }
    assert_eq!(preview.latest().map(|(seq, _)| seq), Some(4));

    // frame read fails, window is due on the same step
    pipeline.step(at(3000));
    assert_eq!(pipeline.state(), LoopState::Reconnecting);
    {
        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].camera_id, 7);
        assert_eq!(reports[0].count_in, 2);
        assert_eq!(reports[0].count_out, 1);
        assert_eq!(reports[0].track_ids, vec!["t1", "t2"]);
    }

    // nothing happens during the outage, the next window is empty
    pipeline.step(at(4000));
    pipeline.step(at(4010));
    pipeline.step(at(6000));
    let reports = reports.borrow();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].count_in, 0);
    assert_eq!(reports[1].count_out, 0);
    assert!(reports[1].track_ids.is_empty());
    assert_eq!(pipeline.crossings().totals().entered, 2);
}
