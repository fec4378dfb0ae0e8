//! Shared fixtures for the reconbench-core integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use reconbench_core::prelude::*;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tempfile::TempDir;

/// Scratch workspace with an `images/` directory and a `results/` root.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new(image_count: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images")).unwrap();
        for index in 0..image_count {
            std::fs::write(
                dir.path().join("images").join(format!("IMG_{index:04}.jpg")),
                b"jpeg",
            )
            .unwrap();
        }
        Self { dir }
    }

    pub fn images(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    pub fn results(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    pub fn request(&self) -> JobRequest {
        JobRequest::builder()
            .input_path(self.images())
            .results_root(self.results())
            .max_resolution(1024)
            .build()
    }
}

/// ASCII PLY body with `points` vertices.
pub fn ply(points: u64) -> String {
    let mut body = format!(
        "ply\nformat ascii 1.0\nelement vertex {points}\nproperty float x\nproperty float y\nproperty float z\nend_header\n"
    );
    for index in 0..points {
        body.push_str(&format!("{index} {index} {index}\n"));
    }
    body
}

/// Write an executable shell script named `name` into `dir`.
#[cfg(unix)]
pub fn fake_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut permissions = std::fs::metadata(&path).unwrap().permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).unwrap();
    path
}

/// Adapter that reports a few progress steps, waits, then succeeds or fails.
pub struct StubAdapter {
    pub name: ToolName,
    pub points: Option<u64>,
    pub delay: Duration,
}

impl StubAdapter {
    pub fn succeeding(name: ToolName, points: u64) -> Arc<dyn ToolAdapter> {
        Arc::new(Self {
            name,
            points: Some(points),
            delay: Duration::from_millis(20),
        })
    }

    pub fn failing(name: ToolName) -> Arc<dyn ToolAdapter> {
        Arc::new(Self {
            name,
            points: None,
            delay: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl ToolAdapter for StubAdapter {
    fn name(&self) -> ToolName {
        self.name
    }

    async fn run(&self, request: &RunRequest, progress: &ProgressReporter) -> RunResult {
        for percent in [10, 30, 30, 20, 60] {
            progress.report(percent);
            tokio::time::sleep(self.delay).await;
        }

        match self.points {
            Some(points) => {
                tokio::fs::create_dir_all(&request.output_path).await.unwrap();
                let output = request.output_path.join("cloud.ply");
                tokio::fs::write(&output, ply(points)).await.unwrap();
                progress.report(100);
                RunResult::completed(output)
            }
            None => RunResult::failed(format!("{} segfaulted", self.name)),
        }
    }

    async fn check_availability(&self) -> std::result::Result<bool, ProbeError> {
        Ok(self.points.is_some())
    }

    fn version(&self) -> &str {
        "0.0-test"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SfmMvs
    }

    fn description(&self) -> &str {
        "stub engine"
    }
}

/// Poll until the job leaves `starting`/`running`.
pub async fn wait_for_terminal(coordinator: &JobCoordinator, job_id: JobId) -> Job {
    for _ in 0..500 {
        let job = coordinator.status(job_id).await.unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}
