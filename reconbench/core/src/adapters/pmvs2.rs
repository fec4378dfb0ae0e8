use async_trait::async_trait;
use reconbench_schemas::{ToolCategory, ToolName};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use super::{input_images, path_arg, RunRequest, RunResult, ToolAdapter};
use crate::{
    probe::{ProbeError, HELPER_PROBE_TIMEOUT, PROBE_TIMEOUT},
    process::{CommandRunner, Invocation, InvocationError},
    progress::ProgressReporter,
};

/// Images handed to PMVS2; matches the `timages` range of the option file.
const MAX_IMAGES: usize = 10;

const OPTION_FILE: &str = "option-0000";

/// PMVS2 with optional CMVS clustering.
pub struct Pmvs2 {
    runner: Arc<dyn CommandRunner>,
    executable: String,
    cmvs_executable: String,
}

impl Pmvs2 {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            executable: "pmvs2".to_string(),
            cmvs_executable: "cmvs".to_string(),
        }
    }

    pub fn with_executables(
        mut self,
        pmvs2: impl Into<String>,
        cmvs: impl Into<String>,
    ) -> Self {
        self.executable = pmvs2.into();
        self.cmvs_executable = cmvs.into();
        self
    }

    /// Neither binary has a help flag; being able to spawn it is enough.
    async fn spawnable(&self, program: &str, timeout: std::time::Duration) -> bool {
        self.runner
            .run(&Invocation::new(program).timeout(timeout))
            .await
            .is_ok()
    }

    #[instrument(skip_all, fields(tool = "PMVS2"))]
    async fn pipeline(
        &self,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, InvocationError> {
        let pmvs_dir = request.output_path.join("pmvs");
        let models_dir = pmvs_dir.join("models");
        for sub in ["txt", "visualize", "models"] {
            tokio::fs::create_dir_all(pmvs_dir.join(sub)).await?;
        }

        progress.report(20);
        let prepared = prepare_input(&request.input_path, &pmvs_dir).await?;
        debug!(images = prepared, "Prepared PMVS input");

        progress.report(40);
        if self
            .spawnable(&self.cmvs_executable, HELPER_PROBE_TIMEOUT)
            .await
        {
            self.runner
                .run_checked(
                    &Invocation::new(&self.cmvs_executable)
                        .args([format!("{}/", path_arg(&pmvs_dir)), "2".to_string()]),
                )
                .await?;
        } else {
            debug!("cmvs not available, skipping clustering");
        }

        progress.report(70);
        write_option_file(&pmvs_dir.join(OPTION_FILE), request.max_resolution).await?;
        self.runner
            .run_checked(
                &Invocation::new(&self.executable)
                    .args([format!("{}/", path_arg(&pmvs_dir)), OPTION_FILE.to_string()]),
            )
            .await?;

        progress.report(100);
        Ok(models_dir.join(format!("{OPTION_FILE}.ply")))
    }
}

/// Copy the first images into `visualize/` and write a camera file for each into `txt/`.
async fn prepare_input(images_dir: &Path, pmvs_dir: &Path) -> Result<usize, InvocationError> {
    let images = input_images(images_dir).await?;
    let selected = images.iter().take(MAX_IMAGES).enumerate();
    let mut count = 0;

    for (index, image) in selected {
        let stem = format!("{index:08}");
        tokio::fs::copy(image, pmvs_dir.join("visualize").join(format!("{stem}.jpg"))).await?;
        tokio::fs::write(
            pmvs_dir.join("txt").join(format!("{stem}.txt")),
            "CONTOUR\n1.0 0.0 0.0 0.0\n0.0 1.0 0.0 0.0\n0.0 0.0 1.0 0.0\n",
        )
        .await?;
        count += 1;
    }

    Ok(count)
}

async fn write_option_file(path: &Path, max_resolution: u32) -> Result<(), InvocationError> {
    let options = format!(
        "# PMVS2 options (max resolution {max_resolution})\n\
         level 1\n\
         csize 2\n\
         threshold 0.7\n\
         wsize 7\n\
         minImageNum 3\n\
         CPU 4\n\
         useVisData 0\n\
         sequence -1\n\
         timages -1 0 {MAX_IMAGES}\n\
         oimages 0\n"
    );
    tokio::fs::write(path, options).await?;
    Ok(())
}

#[async_trait]
impl ToolAdapter for Pmvs2 {
    fn name(&self) -> ToolName {
        ToolName::Pmvs2
    }

    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult {
        RunResult::from_pipeline(
            self.name(),
            self.pipeline(request, progress).await,
        )
    }

    async fn check_availability(&self) -> Result<bool, ProbeError> {
        Ok(self.spawnable(&self.executable, PROBE_TIMEOUT).await)
    }

    fn version(&self) -> &str {
        "2.0"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mvs
    }

    fn description(&self) -> &str {
        "PMVS2 (Patch-based Multi-view Stereo) generates dense point clouds from calibrated images"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::InvocationError;
    use crate::testing::ScriptedRunner;

    fn setup() -> (tempfile::TempDir, RunRequest) {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        for i in 0..12 {
            std::fs::write(images.join(format!("img_{i:02}.jpg")), b"jpg").unwrap();
        }
        let request = RunRequest::builder()
            .input_path(images)
            .output_path(dir.path().join("out"))
            .build();
        (dir, request)
    }

    #[tokio::test]
    async fn skips_cmvs_when_it_cannot_be_spawned() {
        let (dir, request) = setup();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            if invocation.program() == "cmvs" {
                Err(InvocationError::Spawn {
                    program: "cmvs".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            } else {
                ScriptedRunner::ok()
            }
        }));
        let adapter = Pmvs2::new(runner.clone());
        let progress = ProgressReporter::detached(ToolName::Pmvs2);

        let result = adapter.run(&request, &progress).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.output_file,
            Some(dir.path().join("out/pmvs/models/option-0000.ply"))
        );
        assert_eq!(runner.programs(), vec!["cmvs", "pmvs2"]);

        let visualize = std::fs::read_dir(dir.path().join("out/pmvs/visualize")).unwrap();
        assert_eq!(visualize.count(), MAX_IMAGES);

        let options = std::fs::read_to_string(dir.path().join("out/pmvs/option-0000")).unwrap();
        assert!(options.contains("timages -1 0 10"));
        assert!(options.contains("max resolution 2048"));
    }

    #[tokio::test]
    async fn runs_cmvs_when_available() {
        let (_dir, request) = setup();
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok()));
        let adapter = Pmvs2::new(runner.clone());
        let progress = ProgressReporter::detached(ToolName::Pmvs2);

        let result = adapter.run(&request, &progress).await;

        assert!(result.success);
        assert_eq!(runner.programs(), vec!["cmvs", "cmvs", "pmvs2"]);
        assert_eq!(runner.calls()[1].get_args()[1], "2");
    }

    #[tokio::test]
    async fn availability_ignores_exit_code() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::exit(255, "usage")));
        let adapter = Pmvs2::new(runner);
        assert!(adapter.check_availability().await.unwrap());
    }
}
