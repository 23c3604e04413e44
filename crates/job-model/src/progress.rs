//! Progress reports and export results exposed to callers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stages of the export process, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStage {
    Preparing,
    Rendering,
    Encoding,
    Finalizing,
    Complete,
}

impl ExportStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportStage::Preparing => "preparing",
            ExportStage::Rendering => "rendering",
            ExportStage::Encoding => "encoding",
            ExportStage::Finalizing => "finalizing",
            ExportStage::Complete => "complete",
        }
    }
}

/// Aggregated export progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Overall progress in `[0, 100]`, non-decreasing within one export.
    pub progress: f64,

    /// Current stage.
    pub stage: ExportStage,

    /// Human-readable status line.
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,

    /// Whole-session average render rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

/// Final outcome of one export call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportResult {
    Completed { output_path: PathBuf, file_size: u64 },
    Failed { error: String },
    Cancelled,
}

impl ExportResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportResult::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ordering() {
        assert!(ExportStage::Preparing < ExportStage::Rendering);
        assert!(ExportStage::Finalizing < ExportStage::Complete);
    }

    #[test]
    fn test_result_tagging() {
        let value = serde_json::to_value(ExportResult::Failed {
            error: "Rendering failed".to_string(),
        })
        .unwrap();
        assert_eq!(value["status"], "failed");
        assert!(ExportResult::Cancelled.is_cancelled());
        assert!(!ExportResult::Cancelled.is_success());
    }
}
