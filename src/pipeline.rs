//! The counting loop: capture, detect, track, count, report.
//!
//! Everything here runs on one thread, one frame at a time. Other tasks only
//! see the preview frame, handed over through a [`FrameSlot`], and the stream
//! URL in use, through a `watch` channel.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{CameraConfig, ConfigSource, ReportSink};
use crate::batch::BatchAggregator;
use crate::capture::{FrameSource, SourceOpener};
use crate::config::Config;
use crate::crossing::{CrossingDetector, CrossingEvent};
use crate::detection::Detector;
use crate::preview::FrameSlot;
use crate::roi::Roi;
use crate::timer::PeriodicTimer;
use crate::track::BBox;
use crate::tracker::CentroidTracker;
use crate::visualization::{Annotate, Overlay};

/// Frame type produced by an opener's sources.
pub type FrameOf<O> = <<O as SourceOpener>::Source as FrameSource>::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No stream endpoint known yet
    NoSource,
    Connecting,
    Streaming,
    /// Source released after a read failure
    Reconnecting,
}

/// What the caller should do before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Wait(Duration),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub camera_id: u32,
    /// Fixed endpoint; when set the backend's value is ignored.
    pub static_stream_url: Option<String>,
    pub default_roi: Roi,
    pub max_disappeared: u32,
    pub max_distance: f32,
    pub post_interval: Duration,
    pub config_refresh: Duration,
    pub no_source_delay: Duration,
    pub reconnect_delay: Duration,
    pub read_failure_delay: Duration,
    pub preview_overlay: bool,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            camera_id: cfg.camera_id,
            static_stream_url: cfg
                .stream_url
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            default_roi: Roi::from_pairs(&cfg.default_roi),
            max_disappeared: cfg.max_disappeared,
            max_distance: cfg.max_distance,
            post_interval: cfg.post_interval(),
            config_refresh: cfg.config_refresh(),
            no_source_delay: Duration::from_millis(cfg.no_source_delay_ms),
            reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            read_failure_delay: Duration::from_millis(cfg.read_failure_delay_ms),
            preview_overlay: cfg.preview_overlay,
        }
    }
}

pub struct Pipeline<O, D, B>
where
    O: SourceOpener,
{
    settings: PipelineSettings,
    opener: O,
    detector: D,
    backend: B,
    preview: Arc<FrameSlot<FrameOf<O>>>,

    state: LoopState,
    source: Option<O::Source>,
    stream_url: Option<String>,
    stream_status: Option<watch::Sender<Option<String>>>,
    roi: Roi,

    tracker: CentroidTracker,
    crossings: CrossingDetector,
    batch: BatchAggregator,
    config_timer: PeriodicTimer,
}

impl<O, D, B> Pipeline<O, D, B>
where
    O: SourceOpener,
    FrameOf<O>: Clone + Annotate,
    D: Detector<FrameOf<O>>,
    B: ConfigSource + ReportSink,
{
    pub fn new(
        settings: PipelineSettings,
        opener: O,
        detector: D,
        backend: B,
        preview: Arc<FrameSlot<FrameOf<O>>>,
        now: Instant,
    ) -> Self {
        let stream_url = settings.static_stream_url.clone();
        let state = if stream_url.is_some() {
            LoopState::Connecting
        } else {
            LoopState::NoSource
        };
        Self {
            tracker: CentroidTracker::new(settings.max_disappeared, settings.max_distance),
            crossings: CrossingDetector::new(),
            batch: BatchAggregator::new(settings.camera_id, settings.post_interval, now),
            config_timer: PeriodicTimer::new(settings.config_refresh),
            roi: settings.default_roi.clone(),
            settings,
            opener,
            detector,
            backend,
            preview,
            state,
            source: None,
            stream_url,
            stream_status: None,
        }
    }

    /// Publish the stream URL in use to `status` now and whenever it changes.
    pub fn with_stream_status(mut self, status: watch::Sender<Option<String>>) -> Self {
        status.send_replace(self.stream_url.clone());
        self.stream_status = Some(status);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref()
    }

    pub fn tracker(&self) -> &CentroidTracker {
        &self.tracker
    }

    pub fn crossings(&self) -> &CrossingDetector {
        &self.crossings
    }

    /// Run forever. Failures are logged and retried; nothing here returns.
    pub fn run(&mut self) -> ! {
        info!(state = ?self.state, "pipeline started");
        loop {
            if let Step::Wait(delay) = self.step(Instant::now()) {
                thread::sleep(delay);
            }
        }
    }

    /// One loop iteration: refresh config if due, advance the capture state
    /// machine (processing at most one frame), flush the batch if due.
    pub fn step(&mut self, now: Instant) -> Step {
        if self.config_timer.fire(now) {
            self.refresh_config();
        }

        let step = match self.state {
            LoopState::NoSource => {
                if self.stream_url.is_some() {
                    self.transition(LoopState::Connecting);
                    Step::Continue
                } else {
                    warn!("stream URL not set, waiting for configuration");
                    Step::Wait(self.settings.no_source_delay)
                }
            }
            LoopState::Connecting => self.connect(),
            LoopState::Streaming => self.read_and_process(),
            LoopState::Reconnecting => {
                self.transition(LoopState::Connecting);
                Step::Continue
            }
        };

        if self.batch.is_due(now) {
            self.flush(now);
        }
        step
    }

    fn connect(&mut self) -> Step {
        let Some(url) = self.stream_url.clone() else {
            self.transition(LoopState::NoSource);
            return Step::Continue;
        };
        match self.opener.open(&url) {
            Ok(source) => {
                self.source = Some(source);
                self.transition(LoopState::Streaming);
                Step::Continue
            }
            Err(e) => {
                warn!(%url, error = %e, "failed to open stream, retrying");
                Step::Wait(self.settings.reconnect_delay)
            }
        }
    }

    fn read_and_process(&mut self) -> Step {
        let Some(source) = self.source.as_mut() else {
            self.transition(LoopState::Connecting);
            return Step::Continue;
        };
        match source.read_frame() {
            Ok(frame) => {
                self.process_frame(&frame);
                Step::Continue
            }
            Err(e) => {
                warn!(error = %e, "frame read failed, reconnecting");
                self.release_source();
                self.transition(LoopState::Reconnecting);
                Step::Wait(self.settings.read_failure_delay)
            }
        }
    }

    /// detect -> track -> crossings -> batch, then hand the frame to preview.
    fn process_frame(&mut self, frame: &FrameOf<O>) {
        match self.detector.detect(frame) {
            Ok(detections) => {
                let boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
                let tracks = self.tracker.update(&boxes);
                let events = self.crossings.evaluate(tracks, Some(&self.roi));
                debug!(
                    detections = boxes.len(),
                    tracks = self.tracker.tracks().len(),
                    events = events.len(),
                    "frame processed"
                );
                for event in events {
                    match event {
                        CrossingEvent::Entry { track_id } => debug!(track_id, "entered ROI"),
                        CrossingEvent::Exit { track_id } => debug!(track_id, "left ROI"),
                    }
                    self.batch.on_event(event);
                }
            }
            // the tracker does not see this frame at all, so tracks do not age
            Err(e) => warn!(error = %e, "detection failed, skipping frame"),
        }
        self.publish_preview(frame);
    }

    fn publish_preview(&self, frame: &FrameOf<O>) {
        let mut copy = frame.clone();
        if self.settings.preview_overlay {
            let overlay = Overlay {
                roi: Some(&self.roi),
                tracks: self.tracker.tracks(),
                totals: self.crossings.totals(),
            };
            if let Err(e) = copy.annotate(&overlay) {
                debug!(error = %e, "preview overlay failed");
            }
        }
        self.preview.publish(copy);
    }

    fn flush(&mut self, now: Instant) {
        let report = self.batch.flush(now);
        match self.backend.send_report(&report) {
            Ok(()) => info!(
                count_in = report.count_in,
                count_out = report.count_out,
                track_ids = ?report.track_ids,
                "report sent"
            ),
            Err(e) => warn!(
                error = %e,
                count_in = report.count_in,
                count_out = report.count_out,
                "report send failed, batch dropped"
            ),
        }
    }

    fn refresh_config(&mut self) {
        match self.backend.camera_config() {
            Ok(cfg) => self.apply_camera_config(cfg),
            Err(e) => warn!(error = %e, "config refresh failed, keeping previous settings"),
        }
    }

    fn apply_camera_config(&mut self, cfg: CameraConfig) {
        match cfg.roi {
            Some(points) if points.len() >= 3 => {
                let roi = Roi::from_pairs(&points);
                if roi != self.roi {
                    info!(?points, "ROI loaded");
                    self.roi = roi;
                }
            }
            Some(points) => {
                warn!(points = points.len(), "ignoring ROI with fewer than 3 points")
            }
            None => {}
        }

        if self.settings.static_stream_url.is_some() {
            return;
        }
        let fetched = cfg
            .stream_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(url) = fetched {
            if self.stream_url.as_deref() != Some(url) {
                info!(%url, "stream URL updated");
                self.stream_url = Some(url.to_string());
                if let Some(status) = &self.stream_status {
                    status.send_replace(self.stream_url.clone());
                }
                if matches!(self.state, LoopState::Streaming) {
                    self.release_source();
                    self.transition(LoopState::Connecting);
                }
            }
        }
    }

    fn release_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "pipeline state");
            self.state = next;
        }
    }
}
