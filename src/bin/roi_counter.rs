use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use roi_counter::{
    backend::HttpBackend,
    capture::OpenCvOpener,
    config::{Config, Mode},
    detection::YoloV5Detector,
    pipeline::{Pipeline, PipelineSettings},
    preview::{self, FrameSlot},
    simulate,
};

/// Edge worker: counts people entering and leaving a camera's region of
/// interest and reports the counts to the backend.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roi_counter=info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(mode) = args.mode {
        cfg.mode = mode;
    }
    info!(mode = ?cfg.mode, camera_id = cfg.camera_id, "starting");

    let mut backend = HttpBackend::from_config(&cfg)?;
    match cfg.mode {
        Mode::Simulate => simulate::run(&mut backend, cfg.camera_id, cfg.post_interval()),
        Mode::Real => run_real(&cfg, backend),
    }
}

fn run_real(cfg: &Config, backend: HttpBackend) -> anyhow::Result<()> {
    let mut detector = YoloV5Detector::new(
        &cfg.model_path,
        &cfg.device,
        cfg.input_size,
        cfg.conf_threshold,
        cfg.iou_threshold,
    )
    .map_err(|e| {
        error!(error = %e, "detector failed to load");
        e
    })?;
    detector.set_classes(cfg.classes.clone());

    let slot = Arc::new(FrameSlot::new());

    // the preview server gets its own runtime; the pipeline stays on this thread
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("building preview runtime")?;
    let (stream_status, camera) = watch::channel(None);
    let app = preview::router(Arc::clone(&slot), camera, cfg.preview_fps);
    let addr = cfg.preview_addr.clone();
    rt.spawn(async move {
        if let Err(e) = preview::serve(addr, app).await {
            error!(error = %e, "preview server stopped");
        }
    });

    let mut pipeline = Pipeline::new(
        PipelineSettings::from_config(cfg),
        OpenCvOpener::new(cfg.capture_timeout()),
        detector,
        backend,
        slot,
        Instant::now(),
    )
    .with_stream_status(stream_status);
    pipeline.run()
}
