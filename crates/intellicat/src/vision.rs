//! HTTP camera and detector adapters.
//!
//! The camera exposes a snapshot endpoint returning raw frame bytes; the detector is a
//! sidecar that accepts those bytes and answers with JSON detections.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

use intellicat_core::vision::{Detection, Detector, Frame, FrameSource, VisionError};

use crate::config::VisionConfig;

const WIDTH_HEADER: &str = "x-frame-width";
const HEIGHT_HEADER: &str = "x-frame-height";

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame Source
// ─────────────────────────────────────────────────────────────────────────────

/// Pulls one frame per call from the camera's snapshot endpoint.
pub struct HttpFrameSource {
    client: reqwest::Client,
    url: String,
    source: String,
    resolution: String,
    default_size: (u32, u32),
}

impl HttpFrameSource {
    pub fn new(config: &VisionConfig, resolution: &str, default_size: (u32, u32)) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            url: config.source_url.clone(),
            source: config.source.clone(),
            resolution: resolution.to_string(),
            default_size,
        })
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn capture(&self) -> Result<Frame, VisionError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("source", self.source.as_str()), ("resolution", self.resolution.as_str())])
            .send()
            .await
            .map_err(|e| VisionError::Capture(format!("snapshot request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(VisionError::Capture(format!("camera error {}: {}", status, error_text)));
        }

        let (width, height) = frame_size(resp.headers(), self.default_size)?;
        let data = resp
            .bytes()
            .await
            .map_err(|e| VisionError::Capture(format!("failed to read snapshot: {}", e)))?;
        if data.is_empty() {
            return Err(VisionError::InvalidFrame("empty snapshot".to_string()));
        }

        debug!(width, height, bytes = data.len(), "Frame captured");
        Ok(Frame {
            width,
            height,
            data: data.to_vec(),
            captured_at: Instant::now(),
        })
    }
}

/// Frame dimensions from the response headers, falling back to the configured resolution.
fn frame_size(headers: &HeaderMap, default: (u32, u32)) -> Result<(u32, u32), VisionError> {
    let read = |name: &str, fallback: u32| -> Result<u32, VisionError> {
        match headers.get(name) {
            None => Ok(fallback),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| VisionError::InvalidFrame(format!("bad {} header", name))),
        }
    };
    Ok((read(WIDTH_HEADER, default.0)?, read(HEIGHT_HEADER, default.1)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Detector
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Posts frames to the detection sidecar.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(config: &VisionConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config.request_timeout())?,
            url: config.detector_url.clone(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let resp = self
            .client
            .post(&self.url)
            .query(&[("width", frame.width), ("height", frame.height)])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(frame.data.clone())
            .send()
            .await
            .map_err(|e| VisionError::Inference(format!("detector request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(VisionError::Inference(format!("detector error {}: {}", status, error_text)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| VisionError::Inference(format!("failed to read detections: {}", e)))?;
        parse_detections(&body)
    }
}

/// Accepts either `{"detections": [...]}` or a bare array.
fn parse_detections(body: &str) -> Result<Vec<Detection>, VisionError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| VisionError::Inference(format!("failed to parse detections: {}", e)))?;
    let parsed = if value.is_array() {
        serde_json::from_value::<Vec<Detection>>(value)
    } else {
        serde_json::from_value::<DetectResponse>(value).map(|r| r.detections)
    };
    parsed.map_err(|e| VisionError::Inference(format!("unexpected detection format: {}", e)))
}
