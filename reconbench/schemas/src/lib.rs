//! # Reconbench Schemas
//!
//! Shared data model for the reconbench ecosystem: the supported reconstruction
//! engines, job and per-tool progress records, run metrics, accelerator status
//! and the request/response payloads of the HTTP API. Keeping these types here
//! lets the core engine, the server and the CLI agree on one wire format.

pub mod api;
pub mod gpu;
pub mod job;
pub mod legacy;
pub mod metrics;
pub mod system;
pub mod tools;

mod serde_helpers;

// Re-export the main types for convenience
pub use api::{
    DatasetImages, FileEntry, ReconstructionRequest, ReconstructionStarted, ResultListing,
    UploadResponse,
};
pub use gpu::{GpuInfo, GpuStatus};
pub use job::{Job, JobId, JobStatus, ToolState, ToolStatus, ToolStatuses};
pub use legacy::{
    DatasetSummary, JobRecord, LegacyReconstructionQueued, LegacyStatus, LegacyUploadResponse,
    MethodInfo, MethodKind,
};
pub use metrics::Metrics;
pub use system::{CpuInfo, DiskInfo, MemoryInfo, SystemInfo};
pub use tools::{ToolCategory, ToolInfo, ToolName, UnsupportedToolName};
