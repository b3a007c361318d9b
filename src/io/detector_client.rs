//! HTTP face detector client
//!
//! Posts the encoded frame to a detection service and expects
//! `{"faces": [{"box": {...}, "confidence": 0.93, "descriptor": [...]}]}`.

use crate::domain::{Detection, DetectorError, FaceDetector, Frame};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::Duration;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    faces: Vec<Detection>,
}

pub struct HttpDetector {
    url: String,
    client: reqwest::Client,
}

impl HttpDetector {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).http1_only().build()?;
        Ok(Self { url: url.to_string(), client })
    }
}

fn parse_response(body: &[u8]) -> Result<Vec<Detection>, DetectorError> {
    serde_json::from_slice::<DetectResponse>(body)
        .map(|r| r.faces)
        .map_err(|e| DetectorError::Decode(e.to_string()))
}

#[async_trait]
impl FaceDetector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(frame.data.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DetectorError::Request(e.to_string()))?;

        let body = response.bytes().await.map_err(|e| DetectorError::Request(e.to_string()))?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_faces() {
        let body = br#"{"faces":[
            {"box":{"x":10,"y":20,"width":180,"height":190},"confidence":0.93},
            {"box":{"x":300,"y":40,"width":90,"height":95},"confidence":0.41,"descriptor":[0.1,0.2]}
        ]}"#;
        let faces = parse_response(body).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bbox.width, 180.0);
        assert!(faces[0].descriptor.is_none());
        assert_eq!(faces[1].descriptor.as_deref(), Some(&[0.1, 0.2][..]));
    }

    #[test]
    fn test_parse_empty_and_malformed() {
        assert!(parse_response(b"{}").unwrap().is_empty());
        assert!(matches!(parse_response(b"[1,2"), Err(DetectorError::Decode(_))));
    }
}
