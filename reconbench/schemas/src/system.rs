use crate::gpu::GpuStatus;
use serde::{Deserialize, Serialize};

/// Host snapshot returned by `GET /system-info`. Sizes are in bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct SystemInfo {
    pub gpu: GpuStatus,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub disk: DiskInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct CpuInfo {
    pub cores: usize,
    /// Utilisation in percent across all cores
    pub usage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct DiskInfo {
    pub total: u64,
    pub free: u64,
    pub percent: f64,
}
