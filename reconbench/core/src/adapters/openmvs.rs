use async_trait::async_trait;
use futures::future::join_all;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use super::{input_images, path_arg, RunRequest, RunResult, ToolAdapter};
use crate::{
    probe::{ProbeError, PROBE_TIMEOUT},
    process::{CommandRunner, Invocation, InvocationError},
    progress::ProgressReporter,
};

const INTERFACE_COLMAP: &str = "InterfaceCOLMAP";
const DENSIFY_POINT_CLOUD: &str = "DensifyPointCloud";
const RECONSTRUCT_MESH: &str = "ReconstructMesh";
const REFINE_MESH: &str = "RefineMesh";

/// OpenMVS: densification, meshing and mesh refinement on top of a COLMAP sparse model.
pub struct OpenMvs {
    runner: Arc<dyn CommandRunner>,
    bin_dir: Option<PathBuf>,
}

impl OpenMvs {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            bin_dir: None,
        }
    }

    /// Resolve the OpenMVS executables inside `dir` instead of `PATH`.
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    fn executable(&self, name: &str) -> String {
        match &self.bin_dir {
            Some(dir) => path_arg(&dir.join(name)),
            None => name.to_string(),
        }
    }

    fn command(&self, name: &str, input: &Path, output: &Path) -> Invocation {
        Invocation::new(self.executable(name)).args([
            "-i".to_string(),
            path_arg(input),
            "-o".to_string(),
            path_arg(output),
        ])
    }

    #[instrument(skip_all, fields(tool = "OpenMVS"))]
    async fn pipeline(
        &self,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, InvocationError> {
        let output_dir = &request.output_path;
        tokio::fs::create_dir_all(output_dir).await?;

        progress.report(20);
        let scene = output_dir.join("scene.mvs");
        match sparse_model_for(&request.input_path).await? {
            Some(model) => {
                self.runner
                    .run_checked(
                        &self
                            .command(INTERFACE_COLMAP, &model, &scene)
                            .args(["--image-folder".to_string(), path_arg(&request.input_path)]),
                    )
                    .await?;
            }
            None => {
                debug!("No sparse model next to the input images, writing a placeholder scene");
                write_placeholder_scene(&scene, &request.input_path).await?;
            }
        }

        progress.report(50);
        let dense_scene = output_dir.join("scene_dense.mvs");
        self.runner
            .run_checked(&self.command(DENSIFY_POINT_CLOUD, &scene, &dense_scene).args([
                "--resolution-level".to_string(),
                "1".to_string(),
                "--max-resolution".to_string(),
                request.max_resolution.to_string(),
            ]))
            .await?;

        progress.report(75);
        let mesh_scene = output_dir.join("scene_mesh.mvs");
        self.runner
            .run_checked(&self.command(RECONSTRUCT_MESH, &dense_scene, &mesh_scene))
            .await?;

        progress.report(90);
        let refined_scene = output_dir.join("scene_mesh_refined.mvs");
        self.runner
            .run_checked(&self.command(REFINE_MESH, &mesh_scene, &refined_scene))
            .await?;

        progress.report(100);
        Ok(output_dir.join("scene_mesh_refined.ply"))
    }
}

/// COLMAP model `sparse/0` next to the image directory, if one exists.
async fn sparse_model_for(images_dir: &Path) -> Result<Option<PathBuf>, InvocationError> {
    let Some(parent) = images_dir.parent() else {
        return Ok(None);
    };
    let model = parent.join("sparse").join("0");
    if tokio::fs::try_exists(&model).await? {
        Ok(Some(model))
    } else {
        Ok(None)
    }
}

async fn write_placeholder_scene(scene: &Path, images_dir: &Path) -> Result<(), InvocationError> {
    let image_count = input_images(images_dir).await?.len();
    let content = format!("# OpenMVS scene file\n# {image_count} input images\n");
    tokio::fs::write(scene, content).await?;
    Ok(())
}

#[async_trait]
impl ToolAdapter for OpenMvs {
    fn name(&self) -> ToolName {
        ToolName::OpenMvs
    }

    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult {
        RunResult::from_pipeline(
            self.name(),
            self.pipeline(request, progress).await,
        )
    }

    async fn check_availability(&self) -> Result<bool, ProbeError> {
        let probes = [INTERFACE_COLMAP, DENSIFY_POINT_CLOUD, RECONSTRUCT_MESH, REFINE_MESH]
            .into_iter()
            .map(|name| {
                Invocation::new(self.executable(name))
                    .arg("--help")
                    .timeout(PROBE_TIMEOUT)
            })
            .collect::<Vec<_>>();

        let results = join_all(probes.iter().map(|probe| self.runner.probe(probe))).await;
        Ok(results.into_iter().all(|available| available))
    }

    fn version(&self) -> &str {
        "2.1.0"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mvs
    }

    fn description(&self) -> &str {
        "OpenMVS is a library for computer-vision scientists and especially for Multi-View Stereo reconstruction"
    }
}
