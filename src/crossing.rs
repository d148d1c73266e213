use crate::roi::{is_inside, Roi};
use crate::track::Track;

/// ROI membership transition of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossingEvent {
    Entry { track_id: u64 },
    Exit { track_id: u64 },
}

impl CrossingEvent {
    pub fn track_id(&self) -> u64 {
        match *self {
            CrossingEvent::Entry { track_id } | CrossingEvent::Exit { track_id } => track_id,
        }
    }
}

/// Running totals since process start, used for the preview overlay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrossingTotals {
    pub entered: u64,
    pub exited: u64,
}

/// Turns per-track ROI membership changes into entry and exit events.
#[derive(Debug, Default)]
pub struct CrossingDetector {
    totals: CrossingTotals,
}

impl CrossingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> CrossingTotals {
        self.totals
    }

    /// Compare each track's centroid against the ROI, emit one event per
    /// transition and store the new membership on the track. Call once per
    /// frame after the tracker update.
    pub fn evaluate(&mut self, tracks: &mut [Track], roi: Option<&Roi>) -> Vec<CrossingEvent> {
        let mut events = Vec::new();
        for track in tracks.iter_mut() {
            let inside = is_inside(roi, track.centroid.x, track.centroid.y);
            match (track.in_roi, inside) {
                (false, true) => {
                    self.totals.entered += 1;
                    events.push(CrossingEvent::Entry { track_id: track.id });
                }
                (true, false) => {
                    self.totals.exited += 1;
                    events.push(CrossingEvent::Exit { track_id: track.id });
                }
                _ => {}
            }
            track.in_roi = inside;
        }
        events
    }
}
