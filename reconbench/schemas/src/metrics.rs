use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Measurements taken around one tool run.
///
/// Durations and memory are carried pre-formatted (`"12.34s"`, `"256.0MB"`) because
/// that is what clients display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub processing_time: String,
    pub memory_used: String,
    pub points: u64,
    pub success: bool,
}

impl Metrics {
    pub fn new(elapsed: Duration, memory_bytes: u64, points: u64, success: bool) -> Self {
        Self {
            processing_time: format!("{:.2}s", elapsed.as_secs_f64()),
            memory_used: format!("{:.1}MB", memory_bytes as f64 / (1024.0 * 1024.0)),
            points,
            success,
        }
    }

    /// Metrics for a run that produced nothing. Memory is not measured.
    pub fn failed(elapsed: Duration) -> Self {
        Self {
            memory_used: "0MB".to_string(),
            ..Self::new(elapsed, 0, 0, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_time_and_memory() {
        let metrics = Metrics::new(Duration::from_millis(12_346), 12 * 1024 * 1024, 42, true);
        assert_eq!(metrics.processing_time, "12.35s");
        assert_eq!(metrics.memory_used, "12.0MB");
        assert_eq!(metrics.points, 42);
    }

    #[test]
    fn failed_metrics_are_zeroed() {
        let metrics = Metrics::failed(Duration::from_secs(3));
        assert_eq!(metrics.processing_time, "3.00s");
        assert_eq!(metrics.memory_used, "0MB");
        assert_eq!(metrics.points, 0);
        assert!(!metrics.success);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(Metrics::failed(Duration::ZERO)).unwrap();
        assert_eq!(json["processingTime"], "0.00s");
        assert_eq!(json["memoryUsed"], "0MB");
    }
}
