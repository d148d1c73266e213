//! Error types shared across the counter.

use crate::config::ConfigError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Capture source could not be opened or stopped delivering frames
    #[error("capture error: {0}")]
    Capture(String),

    /// Detector could not load or run its model
    #[error("detector error: {0}")]
    Detector(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
