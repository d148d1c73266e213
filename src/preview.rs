//! Latest-frame sharing between the pipeline and the MJPEG preview server.

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opencv::{
    core::{Mat, Vector},
    imgcodecs,
    prelude::*,
};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::Result;

const BOUNDARY: &str = "frame";
const JPEG_QUALITY: i32 = 85;
const IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Slot<F> {
    seq: u64,
    frame: Option<F>,
}

/// Single-writer, multi-reader holder of the most recent frame.
///
/// Readers get their own copy; the lock is only held for the swap or the
/// clone, never while encoding or sending.
#[derive(Debug)]
pub struct FrameSlot<F> {
    inner: Mutex<Slot<F>>,
}

impl<F> Default for FrameSlot<F> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Slot {
                seq: 0,
                frame: None,
            }),
        }
    }
}

impl<F: Clone> FrameSlot<F> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<F>> {
        // a panicking reader cannot leave a frame half written
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: F) {
        let mut slot = self.lock();
        slot.seq += 1;
        slot.frame = Some(frame);
    }

    /// Copy of the latest frame with its sequence number.
    pub fn latest(&self) -> Option<(u64, F)> {
        let slot = self.lock();
        slot.frame.as_ref().map(|f| (slot.seq, f.clone()))
    }

    /// Copy of the latest frame if it is newer than `seen`.
    pub fn latest_after(&self, seen: u64) -> Option<(u64, F)> {
        let slot = self.lock();
        match &slot.frame {
            Some(f) if slot.seq > seen => Some((slot.seq, f.clone())),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct PreviewState {
    slot: Arc<FrameSlot<Mat>>,
    /// Stream URL the pipeline is currently using
    camera: watch::Receiver<Option<String>>,
    frame_interval: Duration,
}

/// Routes for `/video_feed` and `/health`.
pub fn router(
    slot: Arc<FrameSlot<Mat>>,
    camera: watch::Receiver<Option<String>>,
    fps: u32,
) -> Router {
    let state = PreviewState {
        slot,
        camera,
        frame_interval: Duration::from_secs(1) / fps.max(1),
    };
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the preview routes until the process exits.
pub async fn serve(addr: String, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "preview server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<PreviewState>) -> Json<Value> {
    let camera = state.camera.borrow().clone();
    Json(json!({ "status": "ok", "camera": camera }))
}

async fn video_feed(State(state): State<PreviewState>) -> Response {
    info!("preview client connected");
    let stream = futures::stream::unfold((state, 0u64), |(state, seen)| async move {
        loop {
            let Some((seq, frame)) = state.slot.latest_after(seen) else {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };
            let encoded = tokio::task::spawn_blocking(move || encode_jpeg(&frame)).await;
            match encoded {
                Ok(Ok(jpeg)) => {
                    tokio::time::sleep(state.frame_interval).await;
                    let part = multipart_chunk(&jpeg);
                    return Some((Ok::<_, Infallible>(part), (state, seq)));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "preview frame encode failed");
                    tokio::time::sleep(IDLE_POLL).await;
                }
                Err(e) => {
                    warn!(error = %e, "preview encoder task failed");
                    return None;
                }
            }
        }
    });

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )],
        Body::from_stream(stream),
    )
        .into_response()
}

fn encode_jpeg(frame: &Mat) -> opencv::Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    let params = Vector::from_iter([imgcodecs::IMWRITE_JPEG_QUALITY, JPEG_QUALITY]);
    imgcodecs::imencode(".jpg", frame, &mut buf, &params)?;
    Ok(buf.to_vec())
}

/// One part of a `multipart/x-mixed-replace` body.
fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}
