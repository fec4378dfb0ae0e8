//! Records and payloads of the single-engine container service.

use serde::{Deserialize, Serialize};

/// Lifecycle of a single-engine reconstruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum LegacyStatus {
    Queued,
    Running,
    Processing,
    Completed,
    Failed,
}

impl LegacyStatus {
    /// Fractional progress recorded alongside each status.
    pub fn progress(&self) -> Option<f64> {
        match self {
            LegacyStatus::Queued => Some(0.0),
            LegacyStatus::Running => Some(0.1),
            LegacyStatus::Processing => Some(0.5),
            LegacyStatus::Completed => Some(1.0),
            LegacyStatus::Failed => None,
        }
    }
}

/// Persisted state of one single-engine reconstruction. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct JobRecord {
    pub job_id: String,
    pub method: String,
    pub status: LegacyStatus,
    pub progress: f64,
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result_files: Option<Vec<String>>,
    #[serde(default)]
    pub input_dir: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl JobRecord {
    /// Move to `status`, carrying its progress value. Failed records keep their last progress.
    pub fn transition(&mut self, status: LegacyStatus) {
        self.status = status;
        if let Some(progress) = status.progress() {
            self.progress = progress;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Traditional,
    Neural,
    Specialized,
}

/// Catalog entry for an engine container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct MethodInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: MethodKind,
    pub gpu_required: bool,
    pub estimated_time: String,
    pub quality: String,
    pub mobile_compatible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct DatasetSummary {
    pub name: String,
    pub path: String,
    pub image_count: usize,
    pub has_poses: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct LegacyUploadResponse {
    pub job_id: String,
    pub uploaded_files: Vec<String>,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct LegacyReconstructionQueued {
    pub reconstruction_id: String,
    pub method: String,
    pub status: LegacyStatus,
    pub estimated_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_decodes_without_optional_fields() {
        let record: JobRecord = serde_json::from_str(
            r#"{
                "job_id": "abc_colmap_1700000000",
                "method": "colmap",
                "status": "queued",
                "progress": 0.0,
                "start_time": 1700000000.5
            }"#,
        )
        .unwrap();

        assert_eq!(record.status, LegacyStatus::Queued);
        assert!(record.end_time.is_none());
        assert!(record.parameters.is_empty());
    }

    #[test]
    fn failed_transition_keeps_progress() {
        let mut record: JobRecord = serde_json::from_value(serde_json::json!({
            "job_id": "x",
            "method": "colmap",
            "status": "processing",
            "progress": 0.5,
            "start_time": 1.0,
            "input_dir": "/data/x"
        }))
        .unwrap();

        record.transition(LegacyStatus::Failed);
        assert_eq!(record.status, LegacyStatus::Failed);
        assert_eq!(record.progress, 0.5);

        record.transition(LegacyStatus::Completed);
        assert_eq!(record.progress, 1.0);
    }
}
