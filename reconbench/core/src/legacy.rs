//! Single-engine reconstructions executed inside per-engine containers.
//!
//! Each request becomes a [`JobRecord`] in the [`JobStore`] and is run by
//! `docker exec`-ing the engine's entrypoint. The record moves through
//! `queued → running → processing → completed | failed`; every transition
//! rewrites the whole record.

use bon::Builder;
use chrono::Utc;
use reconbench_schemas::{
    DatasetSummary, JobRecord, LegacyStatus, MethodInfo, MethodKind, ResultListing,
};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::{
    files::{is_safe_segment, list_relative_files, resolve_within},
    process::{stderr_tail, CommandOutput, CommandRunner, Invocation, InvocationError},
    store::{JobStore, StoreError},
};

const CONTAINER_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Job data not found: {0}")]
    UploadNotFound(String),

    #[error("Results not found")]
    ResultsNotFound(String),

    #[error("File not found")]
    FileNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Engine container {0} not available")]
    ContainerUnavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Locations and container settings of the single-engine service.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct LegacyConfig {
    /// Uploaded image sets, one directory per job id
    #[builder(into)]
    pub uploads_dir: PathBuf,
    /// Reference scenes, each with an `images/` directory
    #[builder(into)]
    pub scenes_dir: PathBuf,
    /// Reconstruction outputs, one directory per reconstruction id
    #[builder(into)]
    pub results_dir: PathBuf,
    #[builder(into, default = "docker")]
    pub docker: String,
    #[builder(into, default = "photogrammetry-pipeline")]
    pub container_prefix: String,
    /// Budget of the sparse stage, passed to the engine as `timeout`
    #[builder(default = Duration::from_secs(3600))]
    pub sparse_timeout: Duration,
    /// Budget of the dense stage, passed to the engine as `stereo_timeout`
    #[builder(default = Duration::from_secs(1800))]
    pub dense_timeout: Duration,
}

/// Catalog of engine containers, keyed by method id.
pub fn methods() -> BTreeMap<String, MethodInfo> {
    let entry = |name: &str,
                 description: &str,
                 kind: MethodKind,
                 gpu_required: bool,
                 estimated_time: &str,
                 quality: &str,
                 mobile_compatible: bool| MethodInfo {
        name: name.to_string(),
        description: description.to_string(),
        kind,
        gpu_required,
        estimated_time: estimated_time.to_string(),
        quality: quality.to_string(),
        mobile_compatible,
    };

    [
        (
            "meshroom",
            entry(
                "Meshroom",
                "Traditional SfM with robust feature matching",
                MethodKind::Traditional,
                false,
                "2-4 hours",
                "very_high",
                false,
            ),
        ),
        (
            "colmap",
            entry(
                "COLMAP",
                "State-of-the-art Structure-from-Motion",
                MethodKind::Traditional,
                false,
                "1-3 hours",
                "very_high",
                false,
            ),
        ),
        (
            "openmvg",
            entry(
                "OpenMVG/MVS",
                "Modular multi-view geometry library",
                MethodKind::Traditional,
                false,
                "1-2 hours",
                "high",
                false,
            ),
        ),
        (
            "instant-ngp",
            entry(
                "Instant-NGP",
                "Fast neural radiance fields with hash encoding",
                MethodKind::Neural,
                true,
                "10-30 minutes",
                "high",
                false,
            ),
        ),
        (
            "gaussian-splatting",
            entry(
                "3D Gaussian Splatting",
                "Real-time neural rendering with explicit 3D representation",
                MethodKind::Neural,
                true,
                "15-45 minutes",
                "very_high",
                false,
            ),
        ),
        (
            "mobilenerf",
            entry(
                "MobileNeRF",
                "Mobile-optimized neural radiance fields",
                MethodKind::Neural,
                false,
                "5-15 minutes",
                "medium",
                true,
            ),
        ),
        (
            "pifuhd",
            entry(
                "PIFuHD",
                "High-resolution human digitization from single images",
                MethodKind::Specialized,
                true,
                "30-60 minutes",
                "high",
                false,
            ),
        ),
    ]
    .into_iter()
    .map(|(id, info)| (id.to_string(), info))
    .collect()
}

/// A record accepted by [`LegacyRunner::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedReconstruction {
    pub record: JobRecord,
    pub estimated_time: String,
}

pub struct LegacyRunner {
    config: LegacyConfig,
    store: JobStore,
    runner: Arc<dyn CommandRunner>,
}

impl LegacyRunner {
    pub fn new(config: LegacyConfig, store: JobStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            store,
            runner,
        }
    }

    pub fn config(&self) -> &LegacyConfig {
        &self.config
    }

    /// Directory receiving the images of an upload.
    pub fn upload_dir(&self, job_id: &str) -> PathBuf {
        self.config.uploads_dir.join(job_id)
    }

    /// Validate a request and store it as a `queued` record.
    ///
    /// `parameters` is a JSON object; anything unparseable is treated as empty.
    /// The stage budgets are filled in when the caller did not set them.
    pub async fn enqueue(
        &self,
        job_id: &str,
        method: &str,
        dataset_name: Option<&str>,
        parameters: Option<&str>,
    ) -> Result<QueuedReconstruction, LegacyError> {
        let catalog = methods();
        let info = catalog
            .get(method)
            .ok_or_else(|| LegacyError::UnknownMethod(method.to_string()))?;

        let input_dir = match dataset_name {
            Some(dataset) => {
                let dir = self.config.scenes_dir.join(dataset).join("images");
                if !is_safe_segment(dataset) || !tokio::fs::try_exists(&dir).await.unwrap_or(false)
                {
                    return Err(LegacyError::DatasetNotFound(dataset.to_string()));
                }
                dir
            }
            None => {
                let dir = self.upload_dir(job_id);
                if !is_safe_segment(job_id) || !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                    return Err(LegacyError::UploadNotFound(job_id.to_string()));
                }
                dir
            }
        };

        let mut params = parameters
            .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw).ok())
            .unwrap_or_default();
        params
            .entry("timeout")
            .or_insert_with(|| Value::from(self.config.sparse_timeout.as_secs()));
        params
            .entry("stereo_timeout")
            .or_insert_with(|| Value::from(self.config.dense_timeout.as_secs()));

        let record = JobRecord {
            job_id: format!("{job_id}_{method}_{}", Utc::now().timestamp()),
            method: method.to_string(),
            status: LegacyStatus::Queued,
            progress: 0.0,
            start_time: unix_now(),
            end_time: None,
            error_message: None,
            result_files: None,
            input_dir: input_dir.display().to_string(),
            parameters: params,
        };
        self.store.put(&record).await?;

        info!(reconstruction_id = %record.job_id, method, "Queued reconstruction");
        Ok(QueuedReconstruction {
            record,
            estimated_time: info.estimated_time.clone(),
        })
    }

    /// Run a queued reconstruction on a background task.
    pub fn start(self: &Arc<Self>, reconstruction_id: String) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        let span = info_span!("reconstruction", reconstruction_id = %reconstruction_id);
        tokio::spawn(
            async move {
                if let Err(e) = runner.run(&reconstruction_id).await {
                    error!(error = %e, "Reconstruction bookkeeping failed");
                }
            }
            .instrument(span),
        )
    }

    /// Execute a stored reconstruction to its terminal state.
    ///
    /// Engine failures end up in the record; only store failures are returned.
    #[instrument(skip(self))]
    pub async fn run(&self, reconstruction_id: &str) -> Result<LegacyStatus, LegacyError> {
        let record = self
            .store
            .update(reconstruction_id, |r| r.transition(LegacyStatus::Running))
            .await?;

        let output_dir = self.config.results_dir.join(reconstruction_id);
        let outcome = match tokio::fs::create_dir_all(&output_dir).await {
            Ok(()) => self.execute_in_container(&record, &output_dir).await,
            Err(e) => Err(LegacyError::Invocation(e.into())),
        };

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Reconstruction failed");
                self.fail(reconstruction_id, e.to_string()).await?;
                return Ok(LegacyStatus::Failed);
            }
        };

        self.store
            .update(reconstruction_id, |r| r.transition(LegacyStatus::Processing))
            .await?;

        if !output.success() {
            let message = failure_message(&output);
            warn!(exit_code = ?output.exit_code, error = %message, "Engine reported failure");
            self.fail(reconstruction_id, message).await?;
            return Ok(LegacyStatus::Failed);
        }

        let scan_dir = output_dir.clone();
        let result_files = tokio::task::spawn_blocking(move || list_relative_files(&scan_dir))
            .await
            .unwrap_or_default();
        info!(files = result_files.len(), "Reconstruction completed");

        self.store
            .update(reconstruction_id, |r| {
                r.transition(LegacyStatus::Completed);
                r.end_time = Some(unix_now());
                r.result_files = Some(result_files);
            })
            .await?;
        Ok(LegacyStatus::Completed)
    }

    async fn fail(&self, reconstruction_id: &str, message: String) -> Result<(), LegacyError> {
        self.store
            .update(reconstruction_id, |r| {
                r.transition(LegacyStatus::Failed);
                r.end_time = Some(unix_now());
                r.error_message = Some(message);
            })
            .await?;
        Ok(())
    }

    async fn execute_in_container(
        &self,
        record: &JobRecord,
        output_dir: &Path,
    ) -> Result<CommandOutput, LegacyError> {
        let container = format!("{}-{}-1", self.config.container_prefix, record.method);

        let inspect = Invocation::new(&self.config.docker)
            .args(["inspect", "-f", "{{.State.Running}}", container.as_str()])
            .timeout(CONTAINER_CHECK_TIMEOUT);
        let state = self.runner.run(&inspect).await?;
        if !state.success() {
            warn!(%container, "Engine container not found");
            return Err(LegacyError::ContainerUnavailable(record.method.clone()));
        }
        if state.stdout.trim() != "true" {
            info!(%container, "Starting stopped engine container");
            self.runner
                .run_checked(
                    &Invocation::new(&self.config.docker)
                        .args(["start", container.as_str()])
                        .timeout(CONTAINER_CHECK_TIMEOUT),
                )
                .await?;
        }

        let params = Value::Object(record.parameters.clone()).to_string();
        let budget = self.stage_budget(&record.parameters);
        let exec = Invocation::new(&self.config.docker)
            .args([
                "exec".to_string(),
                "-w".to_string(),
                "/workspace".to_string(),
                container,
                "python".to_string(),
                "/workspace/reconstruct.py".to_string(),
                "--input".to_string(),
                record.input_dir.clone(),
                "--output".to_string(),
                output_dir.display().to_string(),
                "--params".to_string(),
                params,
            ])
            .timeout(budget);

        Ok(self.runner.run(&exec).await?)
    }

    /// Sum of the sparse and dense budgets, taken from the parameters when set.
    fn stage_budget(&self, parameters: &Map<String, Value>) -> Duration {
        let seconds = |key: &str, default: Duration| {
            parameters
                .get(key)
                .and_then(Value::as_f64)
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(default)
        };
        seconds("timeout", self.config.sparse_timeout)
            + seconds("stereo_timeout", self.config.dense_timeout)
    }

    pub async fn status(&self, reconstruction_id: &str) -> Result<JobRecord, LegacyError> {
        Ok(self.store.get(reconstruction_id).await?)
    }

    /// Files written by a reconstruction, relative to its result directory.
    pub async fn results(&self, reconstruction_id: &str) -> Result<ResultListing, LegacyError> {
        let result_dir = self.result_dir(reconstruction_id)?;
        if !tokio::fs::try_exists(&result_dir).await.unwrap_or(false) {
            return Err(LegacyError::ResultsNotFound(reconstruction_id.to_string()));
        }

        let scan_dir = result_dir.clone();
        let result_files = tokio::task::spawn_blocking(move || list_relative_files(&scan_dir))
            .await
            .unwrap_or_default();

        Ok(ResultListing {
            job_id: reconstruction_id.to_string(),
            result_files,
            result_dir: result_dir.display().to_string(),
        })
    }

    /// Absolute path of a result file, refusing anything outside the result directory.
    pub async fn resolve_download(
        &self,
        reconstruction_id: &str,
        relative: &str,
    ) -> Result<PathBuf, LegacyError> {
        let result_dir = self.result_dir(reconstruction_id)?;
        let path = resolve_within(&result_dir, relative)
            .ok_or_else(|| LegacyError::InvalidPath(relative.to_string()))?;

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(LegacyError::FileNotFound(relative.to_string())),
        }
    }

    fn result_dir(&self, reconstruction_id: &str) -> Result<PathBuf, LegacyError> {
        if !is_safe_segment(reconstruction_id) {
            return Err(LegacyError::InvalidPath(reconstruction_id.to_string()));
        }
        Ok(self.config.results_dir.join(reconstruction_id))
    }

    /// Reference scenes that contain an `images/` directory, sorted by name.
    pub async fn datasets(&self) -> Vec<DatasetSummary> {
        let scenes_dir = self.config.scenes_dir.clone();
        tokio::task::spawn_blocking(move || scan_datasets(&scenes_dir))
            .await
            .unwrap_or_default()
    }
}

fn scan_datasets(scenes_dir: &Path) -> Vec<DatasetSummary> {
    let Ok(entries) = std::fs::read_dir(scenes_dir) else {
        return Vec::new();
    };

    let mut datasets: Vec<DatasetSummary> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let scene = entry.path();
            let images = std::fs::read_dir(scene.join("images")).ok()?;
            let image_count = images
                .filter_map(Result::ok)
                .filter(|image| {
                    let name = image.file_name().to_string_lossy().to_lowercase();
                    name.ends_with(".jpg") || name.ends_with(".jpeg") || name.ends_with(".png")
                })
                .count();

            Some(DatasetSummary {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: scene.display().to_string(),
                image_count,
                has_poses: scene.join("poses_bounds.npy").exists(),
            })
        })
        .collect();

    datasets.sort_by(|a, b| a.name.cmp(&b.name));
    datasets
}

fn failure_message(output: &CommandOutput) -> String {
    let stderr = stderr_tail(&output.stderr);
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = stderr_tail(&output.stdout);
    if !stdout.is_empty() {
        return stdout;
    }
    "Unknown error".to_string()
}

fn unix_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedRunner;

    struct Fixture {
        dir: tempfile::TempDir,
        store: JobStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("uploads/u1")).unwrap();
            std::fs::create_dir_all(dir.path().join("scenes/garden/images")).unwrap();
            std::fs::write(dir.path().join("scenes/garden/images/a.jpg"), b"a").unwrap();
            std::fs::write(dir.path().join("scenes/garden/poses_bounds.npy"), b"p").unwrap();
            Self {
                dir,
                store: JobStore::new(Arc::new(MemoryStore::new())),
            }
        }

        fn config(&self) -> LegacyConfig {
            LegacyConfig::builder()
                .uploads_dir(self.dir.path().join("uploads"))
                .scenes_dir(self.dir.path().join("scenes"))
                .results_dir(self.dir.path().join("results"))
                .build()
        }

        fn runner(&self, runner: Arc<ScriptedRunner>) -> LegacyRunner {
            LegacyRunner::new(self.config(), self.store.clone(), runner)
        }
    }

    fn docker_ok(write_result: bool) -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new(move |invocation| {
            let args = invocation.get_args();
            match args[0].as_str() {
                "inspect" => Ok(CommandOutput {
                    exit_code: Some(0),
                    stdout: "true\n".to_string(),
                    stderr: String::new(),
                    duration: Duration::ZERO,
                }),
                "exec" if write_result => {
                    let output = args.iter().position(|a| a == "--output").unwrap() + 1;
                    let dir = Path::new(&args[output]);
                    std::fs::create_dir_all(dir.join("dense")).unwrap();
                    std::fs::write(dir.join("dense/fused.ply"), b"ply").unwrap();
                    ScriptedRunner::ok()
                }
                _ => ScriptedRunner::exit(1, "Traceback: CUDA error"),
            }
        }))
    }

    #[tokio::test]
    async fn enqueue_validates_method_and_input() {
        let fixture = Fixture::new();
        let runner = fixture.runner(docker_ok(true));

        let err = runner.enqueue("u1", "photoshop", None, None).await.unwrap_err();
        assert!(matches!(err, LegacyError::UnknownMethod(_)));

        let err = runner.enqueue("missing", "colmap", None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "Job data not found: missing");

        let err = runner
            .enqueue("u1", "colmap", Some("atlantis"), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Dataset not found: atlantis");
    }

    #[tokio::test]
    async fn enqueue_stores_queued_record_with_budgets() {
        let fixture = Fixture::new();
        let runner = fixture.runner(docker_ok(true));

        let queued = runner
            .enqueue("u1", "colmap", Some("garden"), Some(r#"{"timeout": 600}"#))
            .await
            .unwrap();

        assert!(queued.record.job_id.starts_with("u1_colmap_"));
        assert_eq!(queued.estimated_time, "1-3 hours");
        assert!(queued.record.input_dir.ends_with("scenes/garden/images"));

        let stored = fixture.store.get(&queued.record.job_id).await.unwrap();
        assert_eq!(stored.status, LegacyStatus::Queued);
        assert_eq!(stored.parameters["timeout"], 600);
        assert_eq!(stored.parameters["stereo_timeout"], 1800);
    }

    #[tokio::test]
    async fn malformed_parameters_are_ignored() {
        let fixture = Fixture::new();
        let runner = fixture.runner(docker_ok(true));

        let queued = runner
            .enqueue("u1", "mobilenerf", None, Some("{not json"))
            .await
            .unwrap();
        assert_eq!(queued.record.parameters["timeout"], 3600);
    }

    #[tokio::test]
    async fn successful_run_lists_result_files() {
        let fixture = Fixture::new();
        let docker = docker_ok(true);
        let runner = fixture.runner(docker.clone());
        let queued = runner.enqueue("u1", "colmap", None, None).await.unwrap();
        let id = queued.record.job_id;

        assert_eq!(runner.run(&id).await.unwrap(), LegacyStatus::Completed);

        let record = runner.status(&id).await.unwrap();
        assert_eq!(record.status, LegacyStatus::Completed);
        assert_eq!(record.progress, 1.0);
        assert!(record.end_time.is_some());
        assert_eq!(record.result_files, Some(vec!["dense/fused.ply".to_string()]));

        let exec = &docker.calls()[1];
        let args = exec.get_args();
        assert_eq!(args[3], "photogrammetry-pipeline-colmap-1");
        assert_eq!(exec.get_timeout(), Some(Duration::from_secs(5400)));
        let params: Value = serde_json::from_str(args.last().unwrap()).unwrap();
        assert_eq!(params["stereo_timeout"], 1800);

        let listing = runner.results(&id).await.unwrap();
        assert_eq!(listing.result_files, vec!["dense/fused.ply"]);

        let path = runner.resolve_download(&id, "dense/fused.ply").await.unwrap();
        assert!(path.ends_with("dense/fused.ply"));
    }

    #[tokio::test]
    async fn engine_failure_is_recorded() {
        let fixture = Fixture::new();
        let runner = fixture.runner(docker_ok(false));
        let id = runner
            .enqueue("u1", "colmap", None, None)
            .await
            .unwrap()
            .record
            .job_id;

        assert_eq!(runner.run(&id).await.unwrap(), LegacyStatus::Failed);

        let record = runner.status(&id).await.unwrap();
        assert_eq!(record.status, LegacyStatus::Failed);
        assert_eq!(record.progress, 0.5);
        assert_eq!(record.error_message.as_deref(), Some("Traceback: CUDA error"));
        assert_eq!(record.method, "colmap");
    }

    #[tokio::test]
    async fn missing_container_fails_record() {
        let fixture = Fixture::new();
        let docker = Arc::new(ScriptedRunner::new(|_| {
            ScriptedRunner::exit(1, "Error: No such object")
        }));
        let runner = fixture.runner(docker);
        let id = runner
            .enqueue("u1", "pifuhd", None, None)
            .await
            .unwrap()
            .record
            .job_id;

        assert_eq!(runner.run(&id).await.unwrap(), LegacyStatus::Failed);
        let record = runner.status(&id).await.unwrap();
        assert_eq!(
            record.error_message.as_deref(),
            Some("Engine container pifuhd not available")
        );
        assert_eq!(record.progress, 0.1);
    }

    #[tokio::test]
    async fn download_rejects_traversal() {
        let fixture = Fixture::new();
        let runner = fixture.runner(docker_ok(true));

        let err = runner
            .resolve_download("job", "../../etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, LegacyError::InvalidPath(_)));

        let err = runner.resolve_download("job", "missing.ply").await.unwrap_err();
        assert!(matches!(err, LegacyError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn lists_datasets_with_images() {
        let fixture = Fixture::new();
        std::fs::create_dir_all(fixture.dir.path().join("scenes/empty")).unwrap();
        let runner = fixture.runner(docker_ok(true));

        let datasets = runner.datasets().await;
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "garden");
        assert_eq!(datasets[0].image_count, 1);
        assert!(datasets[0].has_poses);
    }

    #[test]
    fn catalog_lists_every_container() {
        let catalog = methods();
        assert_eq!(catalog.len(), 7);
        assert!(catalog["instant-ngp"].gpu_required);
        assert!(catalog["mobilenerf"].mobile_compatible);
        assert_eq!(catalog["pifuhd"].kind, MethodKind::Specialized);
    }
}
