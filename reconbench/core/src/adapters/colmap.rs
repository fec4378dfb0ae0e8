use async_trait::async_trait;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::instrument;

use super::{path_arg, RunRequest, RunResult, ToolAdapter};
use crate::{
    probe::{ProbeError, PROBE_TIMEOUT},
    process::{CommandRunner, Invocation, InvocationError},
    progress::ProgressReporter,
};

/// COLMAP: feature extraction through stereo fusion with the `colmap` CLI.
pub struct Colmap {
    runner: Arc<dyn CommandRunner>,
    executable: String,
}

impl Colmap {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            executable: "colmap".to_string(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    fn command(&self, subcommand: &str) -> Invocation {
        Invocation::new(&self.executable).arg(subcommand)
    }

    #[instrument(skip_all, fields(tool = "COLMAP"))]
    async fn pipeline(
        &self,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, InvocationError> {
        let output_dir = &request.output_path;
        let database = output_dir.join("database.db");
        let sparse_dir = output_dir.join("sparse");
        let dense_dir = output_dir.join("dense");
        tokio::fs::create_dir_all(&sparse_dir).await?;
        tokio::fs::create_dir_all(&dense_dir).await?;

        let images = path_arg(&request.input_path);

        progress.report(10);
        self.runner
            .run_checked(&self.command("feature_extractor").args([
                "--database_path".to_string(),
                path_arg(&database),
                "--image_path".to_string(),
                images.clone(),
                "--ImageReader.single_camera".to_string(),
                "1".to_string(),
                "--SiftExtraction.max_image_size".to_string(),
                request.max_resolution.to_string(),
            ]))
            .await?;

        progress.report(30);
        self.runner
            .run_checked(
                &self
                    .command("exhaustive_matcher")
                    .args(["--database_path".to_string(), path_arg(&database)]),
            )
            .await?;

        progress.report(50);
        self.runner
            .run_checked(&self.command("mapper").args([
                "--database_path".to_string(),
                path_arg(&database),
                "--image_path".to_string(),
                images.clone(),
                "--output_path".to_string(),
                path_arg(&sparse_dir),
            ]))
            .await?;

        progress.report(70);
        let model_dir = first_model_dir(&sparse_dir)
            .await?
            .ok_or_else(|| InvocationError::Stage("No sparse reconstruction found".to_string()))?;

        self.runner
            .run_checked(&self.command("image_undistorter").args([
                "--image_path".to_string(),
                images,
                "--input_path".to_string(),
                path_arg(&model_dir),
                "--output_path".to_string(),
                path_arg(&dense_dir),
                "--output_type".to_string(),
                "COLMAP".to_string(),
                "--max_image_size".to_string(),
                request.max_resolution.to_string(),
            ]))
            .await?;

        progress.report(90);
        self.runner
            .run_checked(
                &self
                    .command("patch_match_stereo")
                    .args(["--workspace_path".to_string(), path_arg(&dense_dir)]),
            )
            .await?;

        let fused = dense_dir.join("fused.ply");
        self.runner
            .run_checked(&self.command("stereo_fusion").args([
                "--workspace_path".to_string(),
                path_arg(&dense_dir),
                "--output_path".to_string(),
                path_arg(&fused),
            ]))
            .await?;

        progress.report(100);
        Ok(fused)
    }
}

/// First model directory written by the mapper, in name order.
async fn first_model_dir(sparse_dir: &Path) -> Result<Option<PathBuf>, InvocationError> {
    let mut entries = tokio::fs::read_dir(sparse_dir).await?;
    let mut models = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            models.push(entry.path());
        }
    }
    models.sort();
    Ok(models.into_iter().next())
}

#[async_trait]
impl ToolAdapter for Colmap {
    fn name(&self) -> ToolName {
        ToolName::Colmap
    }

    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult {
        RunResult::from_pipeline(
            self.name(),
            self.pipeline(request, progress).await,
        )
    }

    async fn check_availability(&self) -> Result<bool, ProbeError> {
        let help = Invocation::new(&self.executable)
            .arg("--help")
            .timeout(PROBE_TIMEOUT);
        Ok(self.runner.probe(&help).await)
    }

    fn version(&self) -> &str {
        "3.8"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SfmMvs
    }

    fn description(&self) -> &str {
        "COLMAP is a general-purpose Structure-from-Motion (SfM) and Multi-View Stereo (MVS) pipeline"
    }
}
