use nalgebra::Point2;

/// Axis-aligned box in frame coordinates, corners (x1, y1) and (x2, y2).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Midpoint of the box. Zero-area and inverted boxes are not rejected.
    pub fn centroid(&self) -> Point2<f32> {
        Point2::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Matched on the latest frame
    Active,
    /// Missed one or more frames but not yet removed
    Stale,
}

/// A persistent object identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u64,
    pub centroid: Point2<f32>,
    pub bbox: BBox,
    /// Consecutive frames without a matching detection
    pub disappeared: u32,
    /// ROI membership at the previous evaluation
    pub in_roi: bool,
}

impl Track {
    pub fn new(id: u64, bbox: BBox) -> Self {
        Self {
            id,
            centroid: bbox.centroid(),
            bbox,
            disappeared: 0,
            in_roi: false,
        }
    }

    /// Take over a matched detection.
    pub fn update(&mut self, bbox: BBox, centroid: Point2<f32>) {
        self.bbox = bbox;
        self.centroid = centroid;
        self.disappeared = 0;
    }

    pub fn mark_missed(&mut self) {
        self.disappeared = self.disappeared.saturating_add(1);
    }

    pub fn state(&self) -> TrackState {
        if self.disappeared == 0 {
            TrackState::Active
        } else {
            TrackState::Stale
        }
    }

    /// Identity tag reported to the collector.
    pub fn tag(&self) -> String {
        track_tag(self.id)
    }
}

pub fn track_tag(id: u64) -> String {
    format!("t{}", id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_track_initialization() {
        let bbox = BBox::new(100.0, 100.0, 150.0, 200.0);
        let track = Track::new(1, bbox);

        assert_eq!(track.id, 1);
        assert_eq!(track.bbox, bbox);
        assert_eq!(track.disappeared, 0);
        assert!(!track.in_roi);
        assert_relative_eq!(track.centroid.x, 125.0);
        assert_relative_eq!(track.centroid.y, 150.0);
        assert_eq!(track.state(), TrackState::Active);
    }

    #[test]
    fn test_track_update_resets_disappeared() {
        let mut track = Track::new(1, BBox::new(0.0, 0.0, 10.0, 10.0));
        track.mark_missed();
        track.mark_missed();
        assert_eq!(track.disappeared, 2);
        assert_eq!(track.state(), TrackState::Stale);

        let bbox = BBox::new(10.0, 10.0, 20.0, 20.0);
        track.update(bbox, bbox.centroid());
        assert_eq!(track.disappeared, 0);
        assert_eq!(track.bbox, bbox);
        assert_relative_eq!(track.centroid.x, 15.0);
        assert_eq!(track.state(), TrackState::Active);
    }

    #[test]
    fn test_zero_area_box_centroid() {
        let bbox = BBox::new(-4.0, 6.0, -4.0, 6.0);
        let c = bbox.centroid();
        assert_relative_eq!(c.x, -4.0);
        assert_relative_eq!(c.y, 6.0);
        assert_relative_eq!(bbox.width(), 0.0);
    }

    #[test]
    fn test_tag_format() {
        let track = Track::new(17, BBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(track.tag(), "t17");
    }
}
