use async_trait::async_trait;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use super::{input_images, path_arg, RunRequest, RunResult, ToolAdapter};
use crate::{
    probe::ProbeError,
    process::{CommandRunner, Invocation, InvocationError},
    progress::ProgressReporter,
};

/// OpenSfM project pipeline driven through its `opensfm` dispatcher script.
pub struct OpenSfm {
    runner: Arc<dyn CommandRunner>,
    install_dir: PathBuf,
    executable: String,
}

impl OpenSfm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            install_dir: PathBuf::from("/opt/opensfm"),
            executable: "opensfm".to_string(),
        }
    }

    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    async fn step(&self, command: &str, project: &Path) -> Result<(), InvocationError> {
        let invocation =
            Invocation::new(&self.executable).args([command.to_string(), path_arg(project)]);
        self.runner.run_checked(&invocation).await.map(|_| ())
    }

    #[instrument(skip_all, fields(tool = "OpenSfM"))]
    async fn pipeline(
        &self,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, InvocationError> {
        let project = request.output_path.join("opensfm_project");
        tokio::fs::create_dir_all(project.join("images")).await?;

        progress.report(10);
        let copied = prepare_project(&request.input_path, &project, request.max_resolution).await?;
        debug!(images = copied, "Prepared OpenSfM project");

        progress.report(25);
        self.step("extract_metadata", &project).await?;
        self.step("detect_features", &project).await?;

        progress.report(45);
        self.step("match_features", &project).await?;

        progress.report(60);
        self.step("create_tracks", &project).await?;

        progress.report(80);
        self.step("reconstruct", &project).await?;

        progress.report(95);
        self.step("undistort", &project).await?;
        self.step("compute_depthmaps", &project).await?;
        self.step("export_ply", &project).await?;

        let exported = project.join("reconstruction.ply");
        if !tokio::fs::try_exists(&exported).await? {
            return Err(InvocationError::Stage(
                "export_ply produced no point cloud".to_string(),
            ));
        }
        let point_cloud = request.output_path.join("point_cloud.ply");
        tokio::fs::copy(&exported, &point_cloud).await?;

        progress.report(100);
        Ok(point_cloud)
    }
}

/// Copy the input images and write the project `config.yaml`.
async fn prepare_project(
    images_dir: &Path,
    project: &Path,
    max_resolution: u32,
) -> Result<usize, InvocationError> {
    let images = input_images(images_dir).await?;
    for image in &images {
        if let Some(name) = image.file_name() {
            tokio::fs::copy(image, project.join("images").join(name)).await?;
        }
    }

    let config = format!(
        "feature_type: SIFT\n\
         feature_process_size: {max_resolution}\n\
         feature_min_frames: 4000\n\
         processes: 4\n\
         matching_gps_distance: 150\n\
         matching_gps_neighbors: 8\n\
         matching_order_neighbors: 10\n\
         reconstruction_algorithm: TRIANGULATION\n\
         depthmap_method: PATCH_MATCH\n\
         depthmap_resolution: 640\n"
    );
    tokio::fs::write(project.join("config.yaml"), config).await?;

    Ok(images.len())
}

#[async_trait]
impl ToolAdapter for OpenSfm {
    fn name(&self) -> ToolName {
        ToolName::OpenSfm
    }

    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult {
        RunResult::from_pipeline(
            self.name(),
            self.pipeline(request, progress).await,
        )
    }

    async fn check_availability(&self) -> Result<bool, ProbeError> {
        tokio::fs::try_exists(&self.install_dir)
            .await
            .map_err(|source| ProbeError::Inspect {
                path: self.install_dir.clone(),
                source,
            })
    }

    fn version(&self) -> &str {
        "0.5.2"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Sfm
    }

    fn description(&self) -> &str {
        "OpenSfM is a Structure from Motion library written in Python with focus on easy integration and extensibility"
    }
}
