//! Camera configuration source and count ingestion over HTTP.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::batch::Report;
use crate::config::Config;
use crate::error::{Error, Result};

/// Camera settings as served by the backend. Missing fields mean "no change".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// A badly shaped ROI reads as absent so the other fields still apply.
    #[serde(default, deserialize_with = "lenient_roi")]
    pub roi: Option<Vec<[f32; 2]>>,
    #[serde(default, rename = "rtsp_url")]
    pub stream_url: Option<String>,
}

/// The backend stores the ROI as free-form JSON typed in by an operator.
/// Accept `[[x, y], ...]`, also when sent as a JSON string; anything else is
/// logged and dropped.
fn lenient_roi<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<[f32; 2]>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(inner) => inner,
            Err(e) => {
                warn!(error = %e, "ignoring ROI string that is not JSON");
                return Ok(None);
            }
        },
        Some(other) => other,
    };
    match serde_json::from_value::<Vec<[f32; 2]>>(value) {
        Ok(points) => Ok(Some(points)),
        Err(e) => {
            warn!(error = %e, "ignoring malformed ROI");
            Ok(None)
        }
    }
}

pub trait ConfigSource {
    fn camera_config(&mut self) -> Result<CameraConfig>;
}

pub trait ReportSink {
    /// Deliver one report. Implementations do not retry.
    fn send_report(&mut self, report: &Report) -> Result<()>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// Blocking client for the counting backend.
///
/// A bearer token is fetched lazily before the first request and dropped on
/// a 401 so that the next call logs in again.
pub struct HttpBackend {
    http_client: Client,
    api_base: String,
    ingest_url: String,
    camera_id: u32,
    username: String,
    password: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(
        api_base: impl Into<String>,
        ingest_url: impl Into<String>,
        camera_id: u32,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_base: api_base.into(),
            ingest_url: ingest_url.into(),
            camera_id,
            username: username.into(),
            password: password.into(),
            token: None,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.api_base(),
            cfg.ingest_url.clone(),
            cfg.camera_id,
            cfg.username.clone(),
            cfg.password.clone(),
            cfg.http_timeout(),
        )
    }

    fn login(&mut self) -> Result<()> {
        let url = format!("{}/api/auth/login", self.api_base);
        let resp = self
            .http_client
            .post(&url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()?;
        if !resp.status().is_success() {
            return Err(Error::Status {
                status: resp.status().as_u16(),
                url,
            });
        }
        let body: LoginResponse = resp.json()?;
        self.token = Some(body.access_token);
        info!(user = %self.username, "logged in to backend");
        Ok(())
    }

    /// Best effort: requests go out without a token if login fails.
    fn ensure_token(&mut self) {
        if self.token.is_none() {
            if let Err(e) = self.login() {
                warn!(error = %e, "backend login failed");
            }
        }
    }

    fn authorize(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn check_status(&mut self, status: StatusCode, url: &str) -> Result<()> {
        if status == StatusCode::UNAUTHORIZED {
            self.token = None;
        }
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::Status {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

impl ConfigSource for HttpBackend {
    fn camera_config(&mut self) -> Result<CameraConfig> {
        self.ensure_token();
        let url = format!("{}/api/cameras/{}", self.api_base, self.camera_id);
        let resp = self.authorize(self.http_client.get(&url)).send()?;
        self.check_status(resp.status(), &url)?;
        let cfg: CameraConfig = resp.json()?;
        debug!(?cfg, "camera config fetched");
        Ok(cfg)
    }
}

impl ReportSink for HttpBackend {
    fn send_report(&mut self, report: &Report) -> Result<()> {
        self.ensure_token();
        let url = self.ingest_url.clone();
        let resp = self.authorize(self.http_client.post(&url)).json(report).send()?;
        self.check_status(resp.status(), &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_config_parses_backend_payload() {
        let cfg: CameraConfig = serde_json::from_str(
            r#"{"id": 1, "name": "Entrance", "rtsp_url": "rtsp://cam/1",
                "roi": [[0, 0], [100, 0], [100, 50]], "line": null}"#,
        )
        .unwrap();
        assert_eq!(cfg.stream_url.as_deref(), Some("rtsp://cam/1"));
        assert_eq!(cfg.roi.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_camera_config_missing_fields() {
        let cfg: CameraConfig = serde_json::from_str(r#"{"id": 1, "roi": null}"#).unwrap();
        assert_eq!(cfg, CameraConfig::default());
    }

    #[test]
    fn test_malformed_roi_keeps_stream_url() {
        for body in [
            r#"{"rtsp_url": "rtsp://cam/1", "roi": {"points": []}}"#,
            r#"{"rtsp_url": "rtsp://cam/1", "roi": [[0, 0, 1], [5, 5, 1], [0, 5, 1]]}"#,
            r#"{"rtsp_url": "rtsp://cam/1", "roi": "not a polygon"}"#,
            r#"{"rtsp_url": "rtsp://cam/1", "roi": 42}"#,
        ] {
            let cfg: CameraConfig = serde_json::from_str(body).unwrap();
            assert_eq!(cfg.stream_url.as_deref(), Some("rtsp://cam/1"), "{}", body);
            assert_eq!(cfg.roi, None, "{}", body);
        }
    }

    #[test]
    fn test_roi_sent_as_string() {
        let cfg: CameraConfig =
            serde_json::from_str(r#"{"roi": "[[0, 0], [10, 0], [10, 10]]"}"#).unwrap();
        assert_eq!(cfg.roi, Some(vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]]));
    }

    #[test]
    fn test_unreachable_backend_is_error() {
        let mut backend = HttpBackend::new(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9/api/events/ingest",
            1,
            "admin",
            "admin123",
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(backend.camera_config().is_err());
    }
}
