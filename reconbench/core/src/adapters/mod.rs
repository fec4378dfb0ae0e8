//! Engine adapters.
//!
//! Every supported engine implements [`ToolAdapter`]: it runs its ordered stages
//! through a shared [`CommandRunner`], reports progress at each stage boundary
//! and describes itself for the tool listing.

use async_trait::async_trait;
use bon::Builder;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

use crate::{
    probe::ProbeError,
    process::{CommandRunner, InvocationError},
    progress::ProgressReporter,
};

mod alicevision;
mod colmap;
mod openmvs;
mod opensfm;
mod pmvs2;

pub use alicevision::AliceVision;
pub use colmap::Colmap;
pub use openmvs::OpenMvs;
pub use opensfm::OpenSfm;
pub use pmvs2::Pmvs2;

/// Input of a single engine run.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct RunRequest {
    #[builder(into)]
    pub input_path: PathBuf,
    #[builder(into)]
    pub output_path: PathBuf,
    #[builder(default = 2048)]
    pub max_resolution: u32,
}

/// Outcome of [`ToolAdapter::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub success: bool,
    pub output_file: Option<PathBuf>,
    pub error: Option<String>,
}

impl RunResult {
    pub fn completed(output_file: PathBuf) -> Self {
        Self {
            success: true,
            output_file: Some(output_file),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output_file: None,
            error: Some(error.into()),
        }
    }

    /// Collapse a stage pipeline's outcome into a result, logging failures.
    fn from_pipeline(tool: ToolName, outcome: Result<PathBuf, InvocationError>) -> Self {
        match outcome {
            Ok(output_file) => {
                info!(%tool, output = %output_file.display(), "Reconstruction finished");
                Self::completed(output_file)
            }
            Err(e) => {
                warn!(%tool, error = %e, "Reconstruction failed");
                Self::failed(e.to_string())
            }
        }
    }
}

/// A reconstruction engine.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> ToolName;

    /// Run every stage in order. Never panics on engine failure; failures are
    /// returned as `RunResult { success: false, .. }`.
    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult;

    /// Whether the engine's binaries are installed and callable.
    async fn check_availability(&self) -> Result<bool, ProbeError>;

    fn version(&self) -> &str;

    fn category(&self) -> ToolCategory;

    fn description(&self) -> &str;
}

/// One adapter per supported engine, using default executable names.
pub fn default_adapters(runner: Arc<dyn CommandRunner>) -> Vec<Arc<dyn ToolAdapter>> {
    vec![
        Arc::new(Colmap::new(runner.clone())),
        Arc::new(OpenMvs::new(runner.clone())),
        Arc::new(Pmvs2::new(runner.clone())),
        Arc::new(AliceVision::new(runner.clone())),
        Arc::new(OpenSfm::new(runner)),
    ]
}

/// JPEG and PNG files directly inside `dir`, sorted by name.
pub(crate) async fn input_images(dir: &Path) -> Result<Vec<PathBuf>, InvocationError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if is_image && entry.file_type().await?.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
