// src/detector/http.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{Detection, DetectorError, InferenceModel, CONFIDENCE_THRESHOLD};
use crate::source::Frame;

/// Input size hint forwarded to the model server.
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Model served over HTTP: the frame goes out as a multipart JPEG part,
/// detections come back as JSON.
#[derive(Clone)]
pub struct HttpInferenceModel {
    client: reqwest::Client,
    url: String,
    image_size: u32,
}

impl HttpInferenceModel {
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            image_size: DEFAULT_IMAGE_SIZE,
        })
    }
}

#[async_trait]
impl InferenceModel for HttpInferenceModel {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let form = Form::new()
            .part(
                "image",
                Part::bytes(frame.data().to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("imgsz", self.image_size.to_string())
            .text("conf", CONFIDENCE_THRESHOLD.to_string());

        let resp = self.client.post(&self.url).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DetectorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: InferResponse = resp.json().await?;
        Ok(parsed.detections)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::{Multipart, State},
        http::StatusCode,
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::detector::BoundingBox;

    #[derive(Debug, Clone, PartialEq)]
    struct Received {
        name: String,
        file_name: Option<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    }

    type Seen = Arc<Mutex<Vec<Received>>>;

    async fn record_parts(State(seen): State<Seen>, mut form: Multipart) -> Json<Value> {
        while let Some(field) = form.next_field().await.unwrap() {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.unwrap().to_vec();
            seen.lock().unwrap().push(Received {
                name,
                file_name,
                content_type,
                data,
            });
        }
        Json(json!({
            "detections": [
                { "class_id": 1.0, "confidence": 0.92, "bbox": { "x1": 4, "y1": 8, "x2": 60, "y2": 90 } },
                { "class_id": 3, "confidence": 0.4 }
            ]
        }))
    }

    async fn model_server(seen: Seen) -> SocketAddr {
        let app = Router::new()
            .route("/infer", post(record_parts))
            .route(
                "/busy",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
            )
            .with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn model(url: String) -> HttpInferenceModel {
        HttpInferenceModel::with_timeout(url, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn infer_uploads_frame_with_size_and_confidence() {
        let seen = Seen::default();
        let addr = model_server(seen.clone()).await;
        let url = format!("http://{addr}/infer");
        let model = model(url.clone());
        assert_eq!(model.name(), url);

        let detections = model
            .infer(&Frame::new(1, b"\xff\xd8jpeg".to_vec()))
            .await
            .unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].bbox.y2, 90.0);
        assert_eq!(detections[1].class_id, 3);
        assert_eq!(detections[1].bbox, BoundingBox::default());

        let parts = seen.lock().unwrap().clone();
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["image", "imgsz", "conf"]);

        assert_eq!(parts[0].file_name.as_deref(), Some("frame.jpg"));
        assert_eq!(parts[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(parts[0].data, b"\xff\xd8jpeg");
        assert_eq!(parts[1].data, b"640");
        assert_eq!(parts[2].data, b"0.5");
    }

    #[tokio::test]
    async fn non_success_status_is_reported_with_body() {
        let addr = model_server(Seen::default()).await;

        match model(format!("http://{addr}/busy"))
            .infer(&Frame::new(1, b"jpeg".to_vec()))
            .await
        {
            Err(DetectorError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("a 503 must not yield detections"),
        }
    }

    #[test]
    fn response_without_detections_is_empty() {
        let r: InferResponse = serde_json::from_str("{}").unwrap();
        assert!(r.detections.is_empty());

        let r: InferResponse = serde_json::from_str(
            r#"{"detections":[{"class_id":1.0,"confidence":0.81,"bbox":{"x1":1,"y1":2,"x2":30,"y2":40}}]}"#,
        )
        .unwrap();
        assert_eq!(r.detections[0].class_id, 1);
        assert_eq!(r.detections[0].bbox.x2, 30.0);
    }
}
