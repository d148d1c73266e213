use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("environment variable {name}={value:?} is not a valid value")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Camera + detector + tracker pipeline
    Real,
    /// Synthetic reports only, no camera or model
    Simulate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub camera_id: u32,
    /// Static stream endpoint; takes precedence over the backend's value.
    pub stream_url: Option<String>,

    pub model_path: String,
    pub device: String,
    pub input_size: i32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub classes: Vec<i64>,

    pub max_disappeared: u32,
    pub max_distance: f32,

    pub post_interval_secs: u64,
    pub config_refresh_secs: u64,
    pub ingest_url: String,
    pub api_base: Option<String>,
    pub username: String,
    pub password: String,
    pub http_timeout_secs: u64,

    pub capture_timeout_secs: u64,
    pub no_source_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub read_failure_delay_ms: u64,

    /// Used whenever the backend has never supplied a usable ROI.
    pub default_roi: Vec<[f32; 2]>,

    pub preview_addr: String,
    pub preview_fps: u32,
    pub preview_overlay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Real,
            camera_id: 1,
            stream_url: None,
            model_path: "weights/yolov5s.torchscript".to_string(),
            device: "cpu".to_string(),
            input_size: 640,
            conf_threshold: 0.35,
            iou_threshold: 0.45,
            classes: vec![0],
            max_disappeared: 20,
            max_distance: 80.0,
            post_interval_secs: 3,
            config_refresh_secs: 30,
            ingest_url: "http://backend:8000/api/events/ingest".to_string(),
            api_base: None,
            username: "admin".to_string(),
            password: "admin123".to_string(),
            http_timeout_secs: 10,
            capture_timeout_secs: 5,
            no_source_delay_ms: 5000,
            reconnect_delay_ms: 3000,
            read_failure_delay_ms: 1000,
            // near-full frame at 1280x720
            default_roi: vec![[50.0, 50.0], [1230.0, 50.0], [1230.0, 670.0], [50.0, 670.0]],
            preview_addr: "0.0.0.0:5000".to_string(),
            preview_fps: 15,
            preview_overlay: true,
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults or the given file, overlaid with the process environment,
    /// then validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|name| std::env::var(name).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay values from environment variables using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(mode) = get("EDGE_MODE") {
            self.mode = match mode.to_lowercase().as_str() {
                "fake" | "simulate" => Mode::Simulate,
                "real" => Mode::Real,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: "EDGE_MODE",
                        value: mode,
                    })
                }
            };
        }
        parse_env(&get, "EDGE_CAMERA_ID", &mut self.camera_id)?;
        parse_env(&get, "EDGE_POST_INTERVAL_SECONDS", &mut self.post_interval_secs)?;
        parse_env(&get, "EDGE_CONFIG_REFRESH_SECONDS", &mut self.config_refresh_secs)?;
        if let Some(url) = get("EDGE_RTSP_URL") {
            self.stream_url = Some(url);
        }
        if let Some(path) = get("YOLOV5_WEIGHTS") {
            self.model_path = path;
        }
        parse_env(&get, "YOLOV5_CONF", &mut self.conf_threshold)?;
        parse_env(&get, "YOLOV5_IOU", &mut self.iou_threshold)?;
        parse_env(&get, "YOLOV5_IMG_SIZE", &mut self.input_size)?;
        if let Some(device) = get("YOLOV5_DEVICE") {
            self.device = device;
        }
        parse_env(&get, "TRACK_MAX_DISAPPEARED", &mut self.max_disappeared)?;
        parse_env(&get, "TRACK_MAX_DISTANCE", &mut self.max_distance)?;
        if let Some(url) = get("BACKEND_INGEST_URL") {
            self.ingest_url = url;
        }
        if let Some(base) = get("BACKEND_API_BASE") {
            self.api_base = Some(base);
        }
        if let Some(user) = get("EDGE_AUTH_USERNAME") {
            self.username = user;
        }
        if let Some(pass) = get("EDGE_AUTH_PASSWORD") {
            self.password = pass;
        }
        if let Some(addr) = get("EDGE_PREVIEW_ADDR") {
            self.preview_addr = addr;
        }
        Ok(())
    }

    /// Reject settings that would break loop invariants at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.camera_id == 0 {
            return invalid("camera_id must be positive");
        }
        if !self.max_distance.is_finite() || self.max_distance < 0.0 {
            return invalid("max_distance must be a finite, non-negative number");
        }
        if self.post_interval_secs == 0 {
            return invalid("post_interval_secs must be at least 1");
        }
        if self.config_refresh_secs == 0 {
            return invalid("config_refresh_secs must be at least 1");
        }
        if self.http_timeout_secs == 0 || self.capture_timeout_secs == 0 {
            return invalid("timeouts must be at least 1 second");
        }
        if self.default_roi.len() < 3 {
            return invalid("default_roi needs at least 3 points");
        }
        if self.ingest_url.trim().is_empty() {
            return invalid("ingest_url must not be empty");
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) || !(0.0..=1.0).contains(&self.iou_threshold) {
            return invalid("conf_threshold and iou_threshold must be within [0, 1]");
        }
        if self.input_size <= 0 {
            return invalid("input_size must be positive");
        }
        if self.preview_fps == 0 {
            return invalid("preview_fps must be at least 1");
        }
        Ok(())
    }

    /// Base URL of the backend API. Falls back to the ingest URL cut before `/api/`.
    pub fn api_base(&self) -> String {
        if let Some(base) = &self.api_base {
            return base.trim_end_matches('/').to_string();
        }
        let url = self.ingest_url.as_str();
        let base = url.find("/api/").map_or(url, |idx| &url[..idx]);
        base.trim_end_matches('/').to_string()
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_secs(self.post_interval_secs)
    }

    pub fn config_refresh(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

fn parse_env<T, G>(get: &G, name: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(name) {
        *slot = value
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value })?;
    }
    Ok(())
}
