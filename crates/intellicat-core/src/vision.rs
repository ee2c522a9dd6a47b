//! Frame source and detector boundary, plus target selection.
//!
//! The object detector and camera are external collaborators. This module only fixes their
//! shape and decides which detection, if any, becomes the [`DetectionSample`] fed to the
//! proximity scorer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::trace;

use crate::config::DetectionConfig;
use crate::proximity::DetectionSample;

/// Vision collaborator errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VisionError {
    #[error("frame capture failed: {0}")]
    Capture(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("detection timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// One captured image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes as delivered by the source
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Box area after clipping to a `width` x `height` frame.
    pub fn clipped_area(&self, width: u32, height: u32) -> f64 {
        let (w, h) = (width as f32, height as f32);
        let dx = self.x_max.clamp(0.0, w) - self.x_min.clamp(0.0, w);
        let dy = self.y_max.clamp(0.0, h) - self.y_min.clamp(0.0, h);
        if dx <= 0.0 || dy <= 0.0 {
            return 0.0;
        }
        f64::from(dx) * f64::from(dy)
    }
}

/// One object reported by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// What the runtime hands the orchestrator for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// No inference ran this tick.
    NotSampled,
    /// Inference ran and found no qualifying target.
    NoTarget,
    Target(DetectionSample),
}

impl Observation {
    pub fn from_sample(sample: Option<DetectionSample>) -> Self {
        match sample {
            Some(sample) => Observation::Target(sample),
            None => Observation::NoTarget,
        }
    }
}

/// Supplies frames on demand.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn capture(&self) -> Result<Frame, VisionError>;
}

/// Runs object detection on a frame.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError>;
}

/// Picks the target detection out of a detector result.
#[derive(Debug, Clone)]
pub struct TargetSelector {
    label: String,
    min_confidence: f32,
}

impl TargetSelector {
    pub fn new(label: impl Into<String>, min_confidence: f32) -> Self {
        Self {
            label: label.into(),
            min_confidence,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.target_label.clone(), config.min_confidence)
    }

    /// Largest qualifying box by area ratio, or `None` if nothing qualifies.
    pub fn select(&self, detections: &[Detection], frame: &Frame) -> Option<DetectionSample> {
        if frame.width == 0 || frame.height == 0 {
            return None;
        }
        let frame_area = frame.area();

        detections
            .iter()
            .filter(|d| d.label.eq_ignore_ascii_case(&self.label))
            .filter(|d| d.confidence >= self.min_confidence)
            .map(|d| d.bbox.clipped_area(frame.width, frame.height) / frame_area)
            .max_by(|a, b| a.total_cmp(b))
            .map(|ratio| DetectionSample::new(ratio, frame.captured_at))
    }
}

/// Capture one frame, run detection and select the target.
pub async fn sample_once(
    source: &dyn FrameSource,
    detector: &dyn Detector,
    selector: &TargetSelector,
) -> Result<Option<DetectionSample>, VisionError> {
    let frame = source.capture().await?;
    let detections = detector.detect(&frame).await?;
    let sample = selector.select(&detections, &frame);
    trace!(
        detections = detections.len(),
        ratio = sample.map(|s| s.area_ratio),
        "Frame analysed"
    );
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame {
            width: 640,
            height: 480,
            data: Vec::new(),
            captured_at: Instant::now(),
        }
    }

    fn detection(label: &str, confidence: f32, w: f32, h: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                x_min: 10.0,
                y_min: 10.0,
                x_max: 10.0 + w,
                y_max: 10.0 + h,
            },
        }
    }

    #[test]
    fn test_selects_largest_qualifying_box() {
        let selector = TargetSelector::from_config(&DetectionConfig::default());
        let detections = vec![
            detection("cat", 0.9, 64.0, 48.0),
            detection("cat", 0.6, 320.0, 240.0),
            detection("dog", 0.99, 600.0, 400.0),
            detection("cat", 0.3, 600.0, 400.0),
        ];

        let sample = selector.select(&detections, &frame()).unwrap();
        assert!((sample.area_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_nothing_qualifies() {
        let selector = TargetSelector::new("cat", 0.5);
        assert!(selector.select(&[], &frame()).is_none());
        assert!(selector
            .select(&[detection("person", 0.9, 100.0, 100.0)], &frame())
            .is_none());
    }

    #[test]
    fn test_box_clipped_to_frame() {
        let bbox = BoundingBox {
            x_min: -100.0,
            y_min: -100.0,
            x_max: 1000.0,
            y_max: 1000.0,
        };
        assert_eq!(bbox.clipped_area(640, 480), 640.0 * 480.0);

        let inverted = BoundingBox {
            x_min: 50.0,
            y_min: 50.0,
            x_max: 10.0,
            y_max: 90.0,
        };
        assert_eq!(inverted.clipped_area(640, 480), 0.0);
    }

    #[test]
    fn test_observation_from_sample() {
        assert_eq!(Observation::from_sample(None), Observation::NoTarget);
        let sample = DetectionSample::new(0.2, Instant::now());
        assert_eq!(Observation::from_sample(Some(sample)), Observation::Target(sample));
    }

    struct StaticSource;

    #[async_trait]
    impl FrameSource for StaticSource {
        async fn capture(&self) -> Result<Frame, VisionError> {
            Ok(frame())
        }
    }

    struct StaticDetector(Result<Vec<Detection>, VisionError>);

    #[async_trait]
    impl Detector for StaticDetector {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, VisionError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_sample_once_pipeline() {
        let selector = TargetSelector::new("cat", 0.5);
        let detector = StaticDetector(Ok(vec![detection("cat", 0.8, 320.0, 240.0)]));
        let sample = sample_once(&StaticSource, &detector, &selector).await.unwrap();
        assert!(sample.is_some());

        let failing = StaticDetector(Err(VisionError::Inference("model offline".into())));
        let err = sample_once(&StaticSource, &failing, &selector).await.unwrap_err();
        assert_eq!(err, VisionError::Inference("model offline".into()));
    }
}
