use clap::Parser;
use opencv::{
    core::{Point, Rect, Scalar, Vector},
    imgcodecs, imgproc,
    prelude::*,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use roi_counter::{
    config::Config,
    detection::{Detector, YoloV5Detector},
    roi::Roi,
    visualization::{draw_roi, draw_text},
};

/// Run the detector on a single image and mark which people fall inside the
/// configured ROI. Handy when drawing the ROI for a new camera.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the config JSON file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Input image path
    #[arg(long)]
    input: String,
    /// Output image path
    #[arg(long, default_value = "output.jpg")]
    output: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roi_counter=info")),
        )
        .init();

    let args = Args::parse();
    let cfg = Config::load(args.config.as_deref())?;
    let mut detector = YoloV5Detector::new(
        &cfg.model_path,
        &cfg.device,
        cfg.input_size,
        cfg.conf_threshold,
        cfg.iou_threshold,
    )?;
    detector.set_classes(cfg.classes.clone());
    let roi = Roi::from_pairs(&cfg.default_roi);

    let mut img = imgcodecs::imread(&args.input, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        anyhow::bail!("could not read {}", args.input);
    }

    let dets = detector.detect(&img)?;
    draw_roi(&mut img, &roi)?;

    let mut inside = 0;
    for det in &dets {
        let c = det.bbox.centroid();
        let color = if roi.contains(c) {
            inside += 1;
            Scalar::new(0.0, 255.0, 0.0, 0.0)
        } else {
            Scalar::new(0.0, 0.0, 255.0, 0.0)
        };
        let b = &det.bbox;
        let rect = Rect::new(
            b.x1 as i32,
            b.y1 as i32,
            b.width().max(1.0) as i32,
            b.height().max(1.0) as i32,
        );
        imgproc::rectangle(&mut img, rect, color, 2, imgproc::LINE_8, 0)?;
        imgproc::circle(&mut img, Point::new(c.x as i32, c.y as i32), 4, color, -1, imgproc::LINE_8, 0)?;
        imgproc::put_text(
            &mut img,
            &format!("{:.2}", det.confidence),
            Point::new(rect.x, rect.y - 5),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }
    draw_text(
        &mut img,
        &format!("people: {}  in ROI: {}", dets.len(), inside),
        20,
        30,
        0.8,
        (0, 255, 0),
    )?;

    imgcodecs::imwrite(&args.output, &img, &Vector::<i32>::new())?;
    println!("{} detections, {} inside ROI -> {}", dets.len(), inside, args.output);
    Ok(())
}
