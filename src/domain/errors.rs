//! Error taxonomy for the monitoring loop
//!
//! None of these are fatal to the process; the loop stays resumable on the
//! next tick after any of them.

use thiserror::Error;

/// Frame could not be taken from the video source
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CaptureError {
    #[error("video source not ready: no frame dimensions yet")]
    NotReady,
    #[error("frame capture failed: {0}")]
    Failed(String),
}

/// Detector call failed for this tick
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("detector request failed: {0}")]
    Request(String),
    #[error("detector returned malformed response: {0}")]
    Decode(String),
}

/// Age-estimation backend failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("no face found in captured frame")]
    NoFaceFound,
    #[error("analysis timed out after {0} ms")]
    Timeout(u64),
    #[error("analysis backend error: {0}")]
    Backend(String),
    #[error("analysis transport error: {0}")]
    Transport(String),
}

/// Why an averaging session ended without a result
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SamplerError {
    #[error("sample capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("sample analysis failed: {0}")]
    Analysis(AnalysisError),
    #[error("no face found after {0} consecutive sample attempts")]
    TooManyRetries(u32),
    #[error("averaging session cancelled")]
    Cancelled,
    #[error("averaging session produced no samples")]
    NoSamples,
}

/// Engine construction and trigger errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("invalid monitoring config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            EngineError::from(CaptureError::NotReady).to_string(),
            "video source not ready: no frame dimensions yet"
        );
        assert_eq!(
            SamplerError::TooManyRetries(5).to_string(),
            "no face found after 5 consecutive sample attempts"
        );
        assert_eq!(AnalysisError::Timeout(3000).to_string(), "analysis timed out after 3000 ms");
    }
}
