//! Region of interest membership.

use nalgebra::Point2;

/// Closed polygon in frame coordinates. Fewer than three points means the
/// whole frame counts as inside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roi {
    points: Vec<Point2<f32>>,
}

impl Roi {
    pub fn new(points: Vec<Point2<f32>>) -> Self {
        Self { points }
    }

    /// The region covering the whole frame.
    pub fn whole_frame() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[[f32; 2]]) -> Self {
        Self::new(pairs.iter().map(|p| Point2::new(p[0], p[1])).collect())
    }

    pub fn points(&self) -> &[Point2<f32>] {
        &self.points
    }

    /// True if at least three points are configured.
    pub fn is_polygon(&self) -> bool {
        self.points.len() >= 3
    }

    pub fn contains(&self, p: Point2<f32>) -> bool {
        is_inside(Some(self), p.x, p.y)
    }
}

/// Point-in-polygon test. Edges and vertices count as inside.
pub fn is_inside(roi: Option<&Roi>, x: f32, y: f32) -> bool {
    let pts = match roi {
        Some(roi) if roi.is_polygon() => roi.points(),
        _ => return true,
    };

    let mut inside = false;
    let mut j = pts.len() - 1;
    for i in 0..pts.len() {
        let (a, b) = (pts[i], pts[j]);
        if on_segment(a, b, x, y) {
            return true;
        }
        // ray cast towards +x
        if (a.y > y) != (b.y > y) {
            let cross_x = a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y);
            if x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point2<f32>, b: Point2<f32>, x: f32, y: f32) -> bool {
    let cross = (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x);
    let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
    if cross.abs() > 1e-4 * scale {
        return false;
    }
    x >= a.x.min(b.x) && x <= a.x.max(b.x) && y >= a.y.min(b.y) && y <= a.y.max(b.y)
}
