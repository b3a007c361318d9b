//! Scan log - writes every produced age result to file
//!
//! Records are written in JSONL format (one JSON object per line) for
//! compliance review of what the kiosk showed and when.

use crate::domain::{AgeResult, AgeStatistics, FaceKey, ResultKind};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};
use uuid::Uuid;

/// One line of the scan log
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    pub scan_id: String,
    /// RFC 3339 wall-clock timestamp
    pub ts: String,
    pub site: String,
    pub face_key: FaceKey,
    pub age: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AgeStatistics>,
}

impl ScanRecord {
    pub fn from_result(site: &str, result: &AgeResult) -> Self {
        Self {
            scan_id: Uuid::now_v7().to_string(),
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            site: site.to_string(),
            face_key: result.face_key,
            age: result.age,
            passed: result.passed,
            kind: result.kind,
            stats: result.stats.clone(),
        }
    }
}

/// Append-only JSONL writer for scan records
pub struct ScanLog {
    file_path: String,
    site_id: String,
}

impl ScanLog {
    pub fn new(file_path: &str, site_id: &str) -> Self {
        info!(file_path = %file_path, "scan_log_initialized");
        Self { file_path: file_path.to_string(), site_id: site_id.to_string() }
    }

    /// Write a result to the scan log. Returns true on success.
    pub fn write_result(&self, result: &AgeResult) -> bool {
        let record = ScanRecord::from_result(&self.site_id, result);
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                error!(face_key = %result.face_key, error = %e, "scan_log_serialize_failed");
                return false;
            }
        };

        match self.append_line(&json) {
            Ok(()) => {
                debug!(scan_id = %record.scan_id, kind = %record.kind.as_str(), "scan_logged");
                true
            }
            Err(e) => {
                error!(face_key = %result.face_key, error = %e, "scan_log_write_failed");
                false
            }
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use tokio::time::{Duration, Instant};

    fn result(age: u32, kind: ResultKind) -> AgeResult {
        AgeResult::new(
            FaceKey::new(340, 40),
            age,
            Some(age >= 21),
            kind,
            Instant::now(),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_writes_one_line_per_result() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scans.jsonl");
        let log = ScanLog::new(path.to_str().unwrap(), "store-12");

        assert!(log.write_result(&result(30, ResultKind::Fresh)));
        assert!(log.write_result(&result(19, ResultKind::Cached)));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["face_key"], "340_40");
        assert_eq!(first["age"], 30);
        assert_eq!(first["passed"], true);
        assert_eq!(first["kind"], "fresh");
        assert_eq!(first["site"], "store-12");
        assert!(first.get("stats").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["passed"], false);
        assert_ne!(first["scan_id"], second["scan_id"]);
    }

    #[test]
    fn test_averaged_result_carries_stats() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("scans.jsonl");
        let log = ScanLog::new(path.to_str().unwrap(), "kiosk");

        let stats = AgeStatistics::from_samples(&[20, 22, 24, 21, 23]).unwrap();
        assert!(log.write_result(&result(22, ResultKind::Averaged).with_stats(stats)));

        let content = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["kind"], "averaged");
        assert_eq!(parsed["stats"]["average"], 22);
        assert_eq!(parsed["stats"]["samples"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_append_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scans.jsonl");
        fs::write(&path, "{\"existing\":\"data\"}\n").unwrap();

        let log = ScanLog::new(path.to_str().unwrap(), "kiosk");
        log.write_result(&result(40, ResultKind::Fresh));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
    }
}
