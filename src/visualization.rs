use opencv::{
    core::{Mat, Point, Rect, Scalar, Vector},
    imgproc,
    prelude::*,
};

use crate::crossing::CrossingTotals;
use crate::error::Result;
use crate::roi::Roi;
use crate::track::{Track, TrackState};

const COLORS: &[Scalar] = &[
    Scalar::new(255.0, 0.0, 0.0, 0.0),    // Blue
    Scalar::new(0.0, 255.0, 0.0, 0.0),    // Green
    Scalar::new(0.0, 0.0, 255.0, 0.0),    // Red
    Scalar::new(255.0, 255.0, 0.0, 0.0),  // Cyan
    Scalar::new(255.0, 0.0, 255.0, 0.0),  // Magenta
    Scalar::new(0.0, 255.0, 255.0, 0.0),  // Yellow
];
const ROI_COLOR: Scalar = Scalar::new(0.0, 200.0, 255.0, 0.0);
const STALE_COLOR: Scalar = Scalar::new(128.0, 128.0, 128.0, 0.0);

/// What the pipeline knows about the frame it is about to publish.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    pub roi: Option<&'a Roi>,
    pub tracks: &'a [Track],
    pub totals: CrossingTotals,
}

/// Frames that can carry the preview overlay.
pub trait Annotate {
    fn annotate(&mut self, overlay: &Overlay<'_>) -> Result<()>;
}

impl Annotate for Mat {
    fn annotate(&mut self, overlay: &Overlay<'_>) -> Result<()> {
        if let Some(roi) = overlay.roi.filter(|r| r.is_polygon()) {
            draw_roi(self, roi)?;
        }
        draw_tracks(self, overlay.tracks)?;
        let text = format!("IN: {}  OUT: {}", overlay.totals.entered, overlay.totals.exited);
        draw_text(self, &text, 20, 30, 0.8, (0, 255, 0))?;
        Ok(())
    }
}

/// Draw text on an image with specified font size and color
pub fn draw_text(
    frame: &mut Mat,
    text: &str,
    x: i32,
    y: i32,
    font_scale: f64,
    color: (i32, i32, i32),
) -> opencv::Result<()> {
    let color = Scalar::new(color.2 as f64, color.1 as f64, color.0 as f64, 0.0); // BGR format
    let text_pos = Point::new(x, y);

    // black outline first
    imgproc::put_text(
        frame,
        text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        Scalar::new(0.0, 0.0, 0.0, 0.0),
        3,
        imgproc::LINE_8,
        false,
    )?;
    imgproc::put_text(
        frame,
        text,
        text_pos,
        imgproc::FONT_HERSHEY_SIMPLEX,
        font_scale,
        color,
        1,
        imgproc::LINE_8,
        false,
    )
}

pub fn draw_roi(frame: &mut Mat, roi: &Roi) -> opencv::Result<()> {
    let pts: Vector<Point> = roi
        .points()
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    let polys = Vector::<Vector<Point>>::from_iter([pts]);
    imgproc::polylines(frame, &polys, true, ROI_COLOR, 2, imgproc::LINE_8, 0)
}

pub fn draw_track(frame: &mut Mat, track: &Track) -> opencv::Result<()> {
    let color = match track.state() {
        TrackState::Active => COLORS[(track.id as usize) % COLORS.len()],
        TrackState::Stale => STALE_COLOR,
    };
    let b = &track.bbox;
    let rect = Rect::new(
        b.x1 as i32,
        b.y1 as i32,
        b.width().max(1.0) as i32,
        b.height().max(1.0) as i32,
    );
    imgproc::rectangle(frame, rect, color, 2, imgproc::LINE_8, 0)?;

    let c = Point::new(track.centroid.x as i32, track.centroid.y as i32);
    imgproc::circle(frame, c, 4, color, -1, imgproc::LINE_8, 0)?;

    let label = if track.in_roi {
        format!("{} *", track.tag())
    } else {
        track.tag()
    };
    imgproc::put_text(
        frame,
        &label,
        Point::new(rect.x, rect.y - 5),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.5,
        color,
        1,
        imgproc::LINE_8,
        false,
    )
}

/// Draw tracks with a limit on how many to show
pub fn draw_tracks(frame: &mut Mat, tracks: &[Track]) -> opencv::Result<()> {
    const MAX_VISUALIZED_TRACKS: usize = 50;

    for track in tracks.iter().take(MAX_VISUALIZED_TRACKS) {
        draw_track(frame, track)?;
    }
    Ok(())
}
