use serde::{Deserialize, Serialize};

/// Name reported when no accelerator was found.
pub const CPU_MODE: &str = "CPU Mode";

const GPU_COMPILE_FLAGS: &[&str] = &[
    "-DWITH_CUDA=ON",
    "-DCUDA_ENABLED=ON",
    "-DCMAKE_CUDA_COMPILER=/usr/local/cuda/bin/nvcc",
];

const CPU_COMPILE_FLAGS: &[&str] = &["-DWITH_CUDA=OFF", "-DCUDA_ENABLED=OFF"];

/// A single detected accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct GpuInfo {
    pub name: String,
    pub memory_mb: u64,
    pub driver_version: String,
}

/// Accelerator summary. `name`, `memory_mb` and `driver_version` describe the first
/// device; `gpus` lists all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct GpuStatus {
    pub available: bool,
    pub count: usize,
    pub name: String,
    pub memory_mb: u64,
    pub driver_version: Option<String>,
    pub gpus: Vec<GpuInfo>,
}

impl Default for GpuStatus {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl GpuStatus {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            count: 0,
            name: CPU_MODE.to_string(),
            memory_mb: 0,
            driver_version: None,
            gpus: Vec::new(),
        }
    }

    pub fn from_gpus(gpus: Vec<GpuInfo>) -> Self {
        let Some(first) = gpus.first() else {
            return Self::unavailable();
        };

        Self {
            available: true,
            count: gpus.len(),
            name: first.name.clone(),
            memory_mb: first.memory_mb,
            driver_version: Some(first.driver_version.clone()),
            gpus,
        }
    }

    /// Build flags an engine compiled on this host should use.
    pub fn compile_flags(&self) -> &'static [&'static str] {
        if self.available {
            GPU_COMPILE_FLAGS
        } else {
            CPU_COMPILE_FLAGS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_reports_cpu_mode() {
        let status = GpuStatus::unavailable();
        assert!(!status.available);
        assert_eq!(status.name, CPU_MODE);
        assert_eq!(status.compile_flags(), CPU_COMPILE_FLAGS);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json["driver_version"].is_null());
        assert_eq!(json["gpus"], serde_json::json!([]));
    }

    #[test]
    fn summary_uses_first_device() {
        let status = GpuStatus::from_gpus(vec![
            GpuInfo {
                name: "NVIDIA A100".into(),
                memory_mb: 40960,
                driver_version: "535.104.05".into(),
            },
            GpuInfo {
                name: "NVIDIA T4".into(),
                memory_mb: 15360,
                driver_version: "535.104.05".into(),
            },
        ]);

        assert!(status.available);
        assert_eq!(status.count, 2);
        assert_eq!(status.name, "NVIDIA A100");
        assert_eq!(status.memory_mb, 40960);
        assert_eq!(status.driver_version.as_deref(), Some("535.104.05"));
        assert!(status.compile_flags().contains(&"-DWITH_CUDA=ON"));
    }

    #[test]
    fn empty_device_list_is_unavailable() {
        assert_eq!(GpuStatus::from_gpus(vec![]), GpuStatus::unavailable());
    }
}
