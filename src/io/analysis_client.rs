//! HTTP age-estimation client
//!
//! Request: `{"image": "<base64>"}` with an optional bearer token.
//! Response: `{"face_found": true, "age": 27.4}` or
//! `{"face_found": false}` / `{"error": "..."}`.

use crate::domain::{AgeEstimate, AnalysisError, AnalysisService, Frame};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

#[derive(Serialize)]
struct EstimateRequest {
    image: String,
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    #[serde(default = "default_face_found")]
    face_found: bool,
    age: Option<f32>,
    error: Option<String>,
}

fn default_face_found() -> bool {
    true
}

pub struct HttpAgeEstimator {
    url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    client: reqwest::Client,
}

impl HttpAgeEstimator {
    pub fn new(url: &str, timeout: Duration, api_key: Option<&str>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            api_key: api_key.map(str::to_string),
            timeout_ms: timeout.as_millis() as u64,
            client,
        })
    }

    fn map_transport(&self, e: reqwest::Error) -> AnalysisError {
        if e.is_timeout() {
            AnalysisError::Timeout(self.timeout_ms)
        } else {
            AnalysisError::Transport(e.to_string())
        }
    }
}

fn interpret(response: EstimateResponse) -> Result<AgeEstimate, AnalysisError> {
    if let Some(error) = response.error {
        return Err(AnalysisError::Backend(error));
    }
    if !response.face_found {
        return Err(AnalysisError::NoFaceFound);
    }
    match response.age {
        Some(age) if age.is_finite() && age >= 0.0 => Ok(AgeEstimate { age }),
        Some(age) => Err(AnalysisError::Backend(format!("implausible age {age}"))),
        None => Err(AnalysisError::Backend("response missing age".to_string())),
    }
}

#[async_trait]
impl AnalysisService for HttpAgeEstimator {
    async fn estimate_age(&self, frame: &Frame) -> Result<AgeEstimate, AnalysisError> {
        let body = EstimateRequest { image: STANDARD.encode(&frame.data) };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        if status.is_server_error() || status.is_client_error() {
            return Err(AnalysisError::Backend(format!("http status {status}")));
        }

        let parsed: EstimateResponse =
            response.json().await.map_err(|e| self.map_transport(e))?;
        interpret(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<AgeEstimate, AnalysisError> {
        interpret(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn test_age_found() {
        assert_eq!(parse(r#"{"face_found":true,"age":27.4}"#).unwrap(), AgeEstimate { age: 27.4 });
        assert_eq!(parse(r#"{"age":31}"#).unwrap().rounded(), 31);
    }

    #[test]
    fn test_no_face() {
        assert_eq!(parse(r#"{"face_found":false}"#).unwrap_err(), AnalysisError::NoFaceFound);
    }

    #[test]
    fn test_backend_errors() {
        assert!(matches!(parse(r#"{"error":"model not loaded"}"#), Err(AnalysisError::Backend(_))));
        assert!(matches!(parse(r#"{"face_found":true}"#), Err(AnalysisError::Backend(_))));
        assert!(matches!(parse(r#"{"age":-4}"#), Err(AnalysisError::Backend(_))));
    }
}
