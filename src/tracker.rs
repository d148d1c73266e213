use nalgebra::{distance, DMatrix};
use tracing::debug;

use crate::track::{BBox, Track};

/// Greedy nearest-centroid tracker.
///
/// Each call to [`CentroidTracker::update`] is one frame. Detections are
/// matched to existing tracks by repeatedly taking the globally closest
/// remaining (track, detection) pair until the closest pair is farther than
/// `max_distance`. The distance matrix is scanned row-major with rows in
/// ascending track id and columns in ascending detection index, and only a
/// strictly smaller distance replaces the running minimum, so ties go to
/// the lowest track id, then the lowest detection index.
#[derive(Debug)]
pub struct CentroidTracker {
    max_disappeared: u32,
    max_distance: f32,
    next_id: u64,
    /// Live tracks, ascending id
    tracks: Vec<Track>,
}

impl CentroidTracker {
    pub fn new(max_disappeared: u32, max_distance: f32) -> Self {
        Self {
            max_disappeared,
            max_distance,
            next_id: 1,
            tracks: Vec::new(),
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    /// Feed one frame of detections and return the live tracks.
    pub fn update(&mut self, detections: &[BBox]) -> &mut [Track] {
        if detections.is_empty() {
            for track in &mut self.tracks {
                track.mark_missed();
            }
            self.remove_expired();
            return &mut self.tracks;
        }

        let centroids: Vec<_> = detections.iter().map(BBox::centroid).collect();

        if self.tracks.is_empty() {
            for bbox in detections {
                self.spawn(*bbox);
            }
            return &mut self.tracks;
        }

        let mut dists = DMatrix::<f32>::from_fn(self.tracks.len(), detections.len(), |r, c| {
            distance(&self.tracks[r].centroid, &centroids[c])
        });

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];

        for _ in 0..dists.nrows().min(dists.ncols()) {
            let (row, col, min) = argmin(&dists);
            if min > self.max_distance {
                break;
            }
            if !track_used[row] && !det_used[col] {
                self.tracks[row].update(detections[col], centroids[col]);
                track_used[row] = true;
                det_used[col] = true;
            }
            dists.row_mut(row).fill(f32::INFINITY);
            dists.column_mut(col).fill(f32::INFINITY);
        }

        for (track, used) in self.tracks.iter_mut().zip(&track_used) {
            if !used {
                track.mark_missed();
            }
        }
        self.remove_expired();

        for (bbox, used) in detections.iter().zip(&det_used) {
            if !used {
                self.spawn(*bbox);
            }
        }

        &mut self.tracks
    }

    fn spawn(&mut self, bbox: BBox) {
        let track = Track::new(self.next_id, bbox);
        debug!(track_id = track.id, x = track.centroid.x, y = track.centroid.y, "new track");
        self.next_id += 1;
        self.tracks.push(track);
    }

    fn remove_expired(&mut self) {
        let max = self.max_disappeared;
        self.tracks.retain(|t| {
            let keep = t.disappeared <= max;
            if !keep {
                debug!(track_id = t.id, "track removed");
            }
            keep
        });
    }
}

/// Position and value of the smallest entry, first in row-major order on ties.
fn argmin(m: &DMatrix<f32>) -> (usize, usize, f32) {
    let mut best = (0, 0, f32::INFINITY);
    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            let v = m[(r, c)];
            if v < best.2 {
                best = (r, c, v);
            }
        }
    }
    best
}
