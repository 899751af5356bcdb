//
// models.rs
// Dicom-Conv-rs
//
// Serializable per-file outcomes and the batch summary written by `--summary`.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::transcode::TranscodeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Converted,
    Failed,
}

/// Result of transcoding a single input path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_syntax: Option<String>,
    #[serde(default)]
    pub frames: usize,
    #[serde(default)]
    pub bytes_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn converted(input: PathBuf, output: PathBuf, report: &TranscodeReport) -> Self {
        FileOutcome {
            input,
            output: Some(output),
            status: OutcomeStatus::Converted,
            source_syntax: Some(report.source_syntax.to_string()),
            frames: report.frames,
            bytes_written: report.bytes_written,
            error: None,
        }
    }

    pub fn failed(input: PathBuf, output: Option<PathBuf>, error: impl ToString) -> Self {
        FileOutcome {
            input,
            output,
            status: OutcomeStatus::Failed,
            source_syntax: None,
            frames: 0,
            bytes_written: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_converted(&self) -> bool {
        self.status == OutcomeStatus::Converted
    }
}

/// Everything a run did, in input path order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub target_syntax: String,
    pub target_uid: String,
    pub converted: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    pub files: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn all_converted(&self) -> bool {
        self.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_serializes_its_reason() {
        let outcome = FileOutcome::failed(PathBuf::from("in/a.dcm"), None, "not a DICOM file");
        let json = serde_json::to_value(&outcome).expect("json");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "not a DICOM file");
        assert!(json.get("source_syntax").is_none());
    }

    #[test]
    fn converted_outcome_carries_the_report() {
        let report = TranscodeReport {
            source_syntax: "JPEG-LS Lossless",
            target_syntax: "Explicit VR Little Endian",
            frames: 2,
            bytes_written: 4096,
        };
        let outcome = FileOutcome::converted(PathBuf::from("a.dcm"), PathBuf::from("out/a.dcm"), &report);
        assert!(outcome.is_converted());
        assert_eq!(outcome.frames, 2);
        assert_eq!(outcome.source_syntax.as_deref(), Some("JPEG-LS Lossless"));
    }
}
