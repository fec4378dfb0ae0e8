//! Request and response payloads of the multi-tool HTTP API.

use crate::{
    job::JobId,
    serde_helpers::{default_max_resolution, default_resolution},
};
use bon::Builder;
use serde::{Deserialize, Serialize};

/// Body of `POST /reconstruct`.
///
/// Tool names are kept as raw strings so that unsupported names can be reported
/// back to the caller verbatim.
///
/// # Examples
///
/// ```
/// use reconbench_schemas::ReconstructionRequest;
///
/// let request: ReconstructionRequest =
///     serde_json::from_str(r#"{"tools": ["COLMAP", "OpenMVS"], "dataset": "garden"}"#).unwrap();
///
/// assert_eq!(request.max_resolution, 2048);
/// assert_eq!(request.resolution, "images");
/// assert!(request.upload_id.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionRequest {
    pub tools: Vec<String>,

    /// Longest image side handed to every engine
    #[serde(default = "default_max_resolution")]
    #[builder(default = default_max_resolution())]
    pub max_resolution: u32,

    /// Named dataset to reconstruct instead of an upload
    pub dataset: Option<String>,

    /// Image subdirectory of the dataset
    #[serde(default = "default_resolution")]
    #[builder(default = default_resolution())]
    pub resolution: String,

    /// Upload to reconstruct when no dataset is named
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionStarted {
    pub job_id: JobId,
    pub status: String,
}

/// A file on disk, as listed by uploads and dataset listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct UploadResponse {
    pub upload_id: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct DatasetImages {
    pub dataset: String,
    pub resolution: String,
    pub images: Vec<FileEntry>,
}

/// Files produced by a reconstruction, relative to `result_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
pub struct ResultListing {
    pub job_id: String,
    pub result_files: Vec<String>,
    pub result_dir: String,
}
