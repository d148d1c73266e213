//! Capture sources feeding the pipeline.

use opencv::{
    core::{Mat, Vector},
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// An open stream of frames.
pub trait FrameSource {
    type Frame;

    /// Next frame, blocking at most for the source's read timeout.
    fn read_frame(&mut self) -> Result<Self::Frame>;

    /// Close the underlying device or connection.
    fn release(&mut self) {}
}

/// Opens capture sources for a stream endpoint.
pub trait SourceOpener {
    type Source: FrameSource;

    fn open(&mut self, url: &str) -> Result<Self::Source>;
}

/// OpenCV `VideoCapture` for RTSP/HTTP URLs, files or device indices
/// (a bare number such as `0`).
pub struct OpenCvOpener {
    timeout: Duration,
}

impl OpenCvOpener {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl SourceOpener for OpenCvOpener {
    type Source = OpenCvSource;

    fn open(&mut self, url: &str) -> Result<OpenCvSource> {
        let timeout_ms = self.timeout.as_millis().min(i32::MAX as u128) as i32;
        let params = Vector::<i32>::from_iter([
            videoio::CAP_PROP_OPEN_TIMEOUT_MSEC,
            timeout_ms,
            videoio::CAP_PROP_READ_TIMEOUT_MSEC,
            timeout_ms,
        ]);

        let mut cap = match url.trim().parse::<i32>() {
            Ok(index) => VideoCapture::new_with_params(index, videoio::CAP_ANY, &params)?,
            Err(_) => VideoCapture::from_file_with_params(url, videoio::CAP_ANY, &params)?,
        };
        if !cap.is_opened()? {
            return Err(Error::Capture(format!("failed to open {}", url)));
        }
        // keep only the newest frame queued
        if let Err(e) = cap.set(videoio::CAP_PROP_BUFFERSIZE, 1.0) {
            debug!(error = %e, "capture buffer size not supported");
        }

        info!(
            url,
            width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0),
            height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0),
            "capture opened"
        );
        Ok(OpenCvSource { cap })
    }
}

pub struct OpenCvSource {
    cap: VideoCapture,
}

impl FrameSource for OpenCvSource {
    type Frame = Mat;

    fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        let ok = self.cap.read(&mut frame)?;
        if !ok || frame.empty() {
            return Err(Error::Capture("frame read failed".to_string()));
        }
        debug!(width = frame.cols(), height = frame.rows(), "frame captured");
        Ok(frame)
    }

    fn release(&mut self) {
        if let Err(e) = self.cap.release() {
            warn!(error = %e, "capture release failed");
        }
    }
}
