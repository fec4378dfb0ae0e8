use async_trait::async_trait;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{path::PathBuf, sync::Arc};
use tracing::instrument;

use super::{path_arg, RunRequest, RunResult, ToolAdapter};
use crate::{
    probe::ProbeError,
    process::{CommandRunner, Invocation, InvocationError},
    progress::ProgressReporter,
};

/// AliceVision (the Meshroom pipeline) driven node by node.
pub struct AliceVision {
    runner: Arc<dyn CommandRunner>,
    install_dir: PathBuf,
    bin_dir: Option<PathBuf>,
}

impl AliceVision {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            install_dir: PathBuf::from("/opt/meshroom"),
            bin_dir: None,
        }
    }

    /// Meshroom installation whose presence marks the engine as available.
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Resolve the `aliceVision_*` executables inside `dir` instead of `PATH`.
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    fn node(&self, name: &str) -> Invocation {
        let program = format!("aliceVision_{name}");
        match &self.bin_dir {
            Some(dir) => Invocation::new(path_arg(&dir.join(program))),
            None => Invocation::new(program),
        }
    }

    async fn run_node(&self, invocation: Invocation) -> Result<(), InvocationError> {
        self.runner.run_checked(&invocation).await.map(|_| ())
    }

    #[instrument(skip_all, fields(tool = "AliceVision"))]
    async fn pipeline(
        &self,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, InvocationError> {
        let out = &request.output_path;
        let camera_init_dir = out.join("CameraInit");
        let features_dir = out.join("FeatureExtraction");
        let matching_dir = out.join("ImageMatching");
        let sfm_dir = out.join("StructureFromMotion");
        let dense_dir = out.join("DenseReconstruction");
        for dir in [&camera_init_dir, &features_dir, &matching_dir, &sfm_dir, &dense_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let camera_init = path_arg(&camera_init_dir.join("cameraInit.sfm"));
        let features = path_arg(&features_dir);
        let pairs = path_arg(&matching_dir.join("imageMatches.txt"));
        let matches = path_arg(&matching_dir.join("matches"));
        let sfm = path_arg(&sfm_dir.join("sfm.abc"));
        let depth_maps = path_arg(&dense_dir.join("depthMaps"));
        let dense_sfm = path_arg(&dense_dir.join("densePointCloud.abc"));
        let point_cloud = dense_dir.join("dense_point_cloud.ply");

        progress.report(10);
        self.run_node(self.node("cameraInit").args([
            "--imageFolder".to_string(),
            path_arg(&request.input_path),
            "--output".to_string(),
            camera_init.clone(),
        ]))
        .await?;

        progress.report(25);
        self.run_node(self.node("featureExtraction").args([
            "--input".to_string(),
            camera_init.clone(),
            "--output".to_string(),
            features.clone(),
            "--maxImageSize".to_string(),
            request.max_resolution.to_string(),
        ]))
        .await?;

        progress.report(40);
        self.run_node(self.node("imageMatching").args([
            "--input".to_string(),
            camera_init.clone(),
            "--featuresFolders".to_string(),
            features.clone(),
            "--output".to_string(),
            pairs.clone(),
        ]))
        .await?;
        self.run_node(self.node("featureMatching").args([
            "--input".to_string(),
            camera_init.clone(),
            "--featuresFolders".to_string(),
            features.clone(),
            "--imagePairsList".to_string(),
            pairs,
            "--output".to_string(),
            matches.clone(),
        ]))
        .await?;

        progress.report(60);
        self.run_node(self.node("incrementalSfM").args([
            "--input".to_string(),
            camera_init,
            "--featuresFolders".to_string(),
            features,
            "--matchesFolders".to_string(),
            matches,
            "--output".to_string(),
            sfm.clone(),
        ]))
        .await?;

        progress.report(80);
        self.run_node(self.node("depthMapEstimation").args([
            "--input".to_string(),
            sfm.clone(),
            "--output".to_string(),
            depth_maps.clone(),
        ]))
        .await?;
        self.run_node(self.node("meshing").args([
            "--input".to_string(),
            sfm,
            "--depthMapsFolder".to_string(),
            depth_maps,
            "--output".to_string(),
            dense_sfm.clone(),
            "--outputMesh".to_string(),
            path_arg(&dense_dir.join("mesh.obj")),
        ]))
        .await?;
        self.run_node(self.node("convertSfMFormat").args([
            "--input".to_string(),
            dense_sfm,
            "--output".to_string(),
            path_arg(&point_cloud),
        ]))
        .await?;

        progress.report(100);
        Ok(point_cloud)
    }
}

#[async_trait]
impl ToolAdapter for AliceVision {
    fn name(&self) -> ToolName {
        ToolName::AliceVision
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
        "2021.1.0"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SfmMvs
    }

    fn description(&self) -> &str {
        "AliceVision is a photogrammetric computer vision framework for 3D reconstruction and camera tracking"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    #[tokio::test]
    async fn runs_meshroom_nodes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok()));
        let adapter = AliceVision::new(runner.clone());
        let (progress, mut rx) = ProgressReporter::channel(ToolName::AliceVision);
        let request = RunRequest::builder()
            .input_path(dir.path().join("images"))
            .output_path(dir.path().join("out"))
            .max_resolution(3000)
            .build();

        let result = adapter.run(&request, &progress).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.output_file,
            Some(dir.path().join("out/DenseReconstruction/dense_point_cloud.ply"))
        );
        assert_eq!(
            runner.programs(),
            vec![
                "aliceVision_cameraInit",
                "aliceVision_featureExtraction",
                "aliceVision_imageMatching",
                "aliceVision_featureMatching",
                "aliceVision_incrementalSfM",
                "aliceVision_depthMapEstimation",
                "aliceVision_meshing",
                "aliceVision_convertSfMFormat",
            ]
        );
        assert!(runner.calls()[1].get_args().contains(&"3000".to_string()));

        drop(progress);
        let mut reported = Vec::new();
        while let Some(update) = rx.recv().await {
            reported.push(update.percent);
        }
        assert_eq!(reported, vec![10, 25, 40, 60, 80, 100]);
    }

    #[tokio::test]
    async fn availability_follows_install_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok()));

        let installed = AliceVision::new(runner.clone()).with_install_dir(dir.path());
        assert!(installed.check_availability().await.unwrap());

        let missing = AliceVision::new(runner).with_install_dir(dir.path().join("absent"));
        assert!(!missing.check_availability().await.unwrap());
    }
}
