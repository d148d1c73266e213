use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::crossing::CrossingEvent;
use crate::track::track_tag;

/// Outbound count report, one per flushed window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub camera_id: u32,
    pub ts: DateTime<Utc>,
    pub count_in: u32,
    pub count_out: u32,
    /// Tags of every entry in the window, in order, duplicates kept
    pub track_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BatchWindow {
    pub entered_count: u32,
    pub exited_count: u32,
    pub entered_identity_tags: Vec<String>,
    pub window_start: Instant,
}

impl BatchWindow {
    pub fn new(window_start: Instant) -> Self {
        Self {
            entered_count: 0,
            exited_count: 0,
            entered_identity_tags: Vec::new(),
            window_start,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entered_count == 0 && self.exited_count == 0
    }
}

/// Accumulates crossing events over a fixed wall-clock window.
///
/// Delivery is at most once: `flush` always hands out the window and starts
/// a fresh one, whatever happens to the report afterwards.
#[derive(Debug)]
pub struct BatchAggregator {
    camera_id: u32,
    interval: Duration,
    window: BatchWindow,
}

impl BatchAggregator {
    pub fn new(camera_id: u32, interval: Duration, now: Instant) -> Self {
        Self {
            camera_id,
            interval,
            window: BatchWindow::new(now),
        }
    }

    pub fn window(&self) -> &BatchWindow {
        &self.window
    }

    pub fn on_event(&mut self, event: CrossingEvent) {
        match event {
            CrossingEvent::Entry { track_id } => {
                self.window.entered_count += 1;
                self.window.entered_identity_tags.push(track_tag(track_id));
            }
            CrossingEvent::Exit { .. } => {
                self.window.exited_count += 1;
            }
        }
    }

    /// True once at least `interval` has passed since the window opened.
    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window.window_start) >= self.interval
    }

    /// Close the current window into a report and open a new one at `now`.
    pub fn flush(&mut self, now: Instant) -> Report {
        let window = std::mem::replace(&mut self.window, BatchWindow::new(now));
        Report {
            camera_id: self.camera_id,
            ts: Utc::now(),
            count_in: window.entered_count,
            count_out: window.exited_count,
            track_ids: window.entered_identity_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_empty_window() {
        let start = Instant::now();
        let mut agg = BatchAggregator::new(1, Duration::from_secs(3), start);

        let report = agg.flush(start);
        assert_eq!(report.camera_id, 1);
        assert_eq!(report.count_in, 0);
        assert_eq!(report.count_out, 0);
        assert!(report.track_ids.is_empty());
        assert!(agg.window().is_empty());
    }

    #[test]
    fn test_events_accumulate_in_order_with_duplicates() {
        let start = Instant::now();
        let mut agg = BatchAggregator::new(2, Duration::from_secs(3), start);

        agg.on_event(CrossingEvent::Entry { track_id: 3 });
        agg.on_event(CrossingEvent::Exit { track_id: 3 });
        agg.on_event(CrossingEvent::Entry { track_id: 1 });
        agg.on_event(CrossingEvent::Entry { track_id: 3 });

        let report = agg.flush(start);
        assert_eq!(report.count_in, 3);
        assert_eq!(report.count_out, 1);
        assert_eq!(report.track_ids, vec!["t3", "t1", "t3"]);
    }

    #[test]
    fn test_flush_resets_window() {
        let start = Instant::now();
        let later = start + Duration::from_secs(4);
        let mut agg = BatchAggregator::new(1, Duration::from_secs(3), start);

        agg.on_event(CrossingEvent::Entry { track_id: 9 });
        let first = agg.flush(later);
        assert_eq!(first.count_in, 1);

        assert!(agg.window().is_empty());
        assert!(agg.window().entered_identity_tags.is_empty());
        assert_eq!(agg.window().window_start, later);

        let second = agg.flush(later);
        assert_eq!(second.count_in, 0);
        assert!(second.track_ids.is_empty());
    }

    #[test]
    fn test_due_after_interval() {
        let start = Instant::now();
        let agg = BatchAggregator::new(1, Duration::from_secs(3), start);

        assert!(!agg.is_due(start));
        assert!(!agg.is_due(start + Duration::from_millis(2999)));
        assert!(agg.is_due(start + Duration::from_secs(3)));
        assert!(agg.is_due(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_report_wire_format() {
        let start = Instant::now();
        let mut agg = BatchAggregator::new(5, Duration::from_secs(3), start);
        agg.on_event(CrossingEvent::Entry { track_id: 12 });

        let json = serde_json::to_value(agg.flush(start)).unwrap();
        assert_eq!(json["camera_id"], 5);
        assert_eq!(json["count_in"], 1);
        assert_eq!(json["count_out"], 0);
        assert_eq!(json["track_ids"], serde_json::json!(["t12"]));
        assert!(json["ts"].as_str().unwrap().contains('T'));
    }
}
