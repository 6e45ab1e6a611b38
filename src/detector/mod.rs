// src/detector/mod.rs
pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::source::Frame;

pub use http::HttpInferenceModel;

/// Detections below this confidence never trigger an event.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Class id that triggers recording unless `TARGET_CLASS` overrides it.
pub const DEFAULT_TARGET_CLASS: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Inference failed: {0}")]
    Model(String),
}

/// `[x1, y1, x2, y2]` in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(deserialize_with = "class_id_from_number")]
    pub class_id: u32,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: BoundingBox,
}

/// Models report class ids as floats (`1.0`); accept any integral number.
fn class_id_from_number<'de, D>(de: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let v = f64::deserialize(de)?;
    class_id_from_f64(v).map_err(serde::de::Error::custom)
}

/// Parses a class id written either as `1` or as `1.0`.
pub fn parse_class_id(raw: &str) -> Result<u32, String> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("class id must be a number, got `{raw}`"))?;
    class_id_from_f64(v)
}

fn class_id_from_f64(v: f64) -> Result<u32, String> {
    if !v.is_finite() || v.fract() != 0.0 || v < 0.0 || v > f64::from(u32::MAX) {
        return Err(format!("class id must be a non-negative integer, got {v}"));
    }
    Ok(v as u32)
}

/// Outcome of one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classification {
    pub present: bool,
    pub detections: Vec<Detection>,
}

/// The opaque frame -> detections function.
#[async_trait]
pub trait InferenceModel: Send + Sync {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;

    fn name(&self) -> &str;
}

/// Wraps a model and decides whether the target class is present.
#[derive(Clone)]
pub struct Detector {
    model: Arc<dyn InferenceModel>,
    target_class: u32,
    threshold: f32,
}

impl Detector {
    pub fn new(model: Arc<dyn InferenceModel>, target_class: u32) -> Self {
        Self {
            model,
            target_class,
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    pub fn target_class(&self) -> u32 {
        self.target_class
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub async fn classify(&self, frame: &Frame) -> Result<Classification, DetectorError> {
        let detections = self.model.infer(frame).await?;
        Ok(Classification {
            present: self.is_present(&detections),
            detections,
        })
    }

    pub fn is_present(&self, detections: &[Detection]) -> bool {
        detections
            .iter()
            .any(|d| d.class_id == self.target_class && d.confidence >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Detection>);

    #[async_trait]
    impl InferenceModel for Fixed {
        async fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn det(class_id: u32, confidence: f32) -> Detection {
        Detection {
            class_id,
            confidence,
            bbox: BoundingBox::default(),
        }
    }

    #[tokio::test]
    async fn present_needs_target_class_at_threshold() {
        let frame = Frame::new(1, b"jpeg".to_vec());

        let d = Detector::new(Arc::new(Fixed(vec![det(1, 0.5)])), 1);
        assert!(d.classify(&frame).await.unwrap().present);

        let d = Detector::new(Arc::new(Fixed(vec![det(1, 0.49), det(0, 0.99)])), 1);
        let c = d.classify(&frame).await.unwrap();
        assert!(!c.present);
        assert_eq!(c.detections.len(), 2);

        let d = Detector::new(Arc::new(Fixed(vec![det(3, 0.9)])), 3);
        assert!(d.classify(&frame).await.unwrap().present);
    }

    #[test]
    fn float_class_ids_are_accepted() {
        let d: Detection =
            serde_json::from_str(r#"{"class_id": 1.0, "confidence": 0.7}"#).unwrap();
        assert_eq!(d.class_id, 1);
        assert_eq!(d.bbox, BoundingBox::default());

        let bad = serde_json::from_str::<Detection>(r#"{"class_id": 1.5, "confidence": 0.7}"#);
        assert!(bad.is_err());
    }
}
