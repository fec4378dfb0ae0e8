//! Multi-tool job coordination.
//!
//! The [`JobCoordinator`] owns the registry of jobs. A job is created in the
//! `starting` state, executed by a single task which dispatches its tools through
//! the [`ReconstructionManager`], and settles into `completed`, `partial` or
//! `failed` once every tool has finished. Progress reported by the adapters flows
//! back over a channel and is applied to the job by that task alone.

use bon::Builder;
use futures::future::join_all;
use reconbench_schemas::{Job, JobId, JobStatus, ToolName, ToolState, ToolStatus};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    adapters::RunRequest,
    manager::{ReconstructionManager, ToolRunReport},
    progress::{ProgressReporter, ProgressUpdate},
};

/// Error recorded for tools skipped because the coordinator was shutting down.
pub const CANCELLED_BEFORE_DISPATCH: &str = "cancelled before dispatch";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Unsupported tools: {}", .0.join(", "))]
    UnsupportedTool(Vec<String>),

    #[error("At least one tool must be requested")]
    NoTools,

    #[error("Job not found")]
    JobNotFound(JobId),

    #[error("Job not completed")]
    JobNotComplete { job_id: JobId, status: JobStatus },
}

/// How the tools of one job are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// One tool at a time, in request order.
    #[default]
    Sequential,
    /// Every tool of the job at once.
    Parallel,
}

/// Where a job reads its images and writes its results.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct JobRequest {
    #[builder(into)]
    pub input_path: PathBuf,
    /// Each tool writes to `<results_root>/<job id>/<tool lowercased>`
    #[builder(into)]
    pub results_root: PathBuf,
    #[builder(default = 2048)]
    pub max_resolution: u32,
}

impl JobRequest {
    pub fn output_dir(&self, job_id: JobId, tool: ToolName) -> PathBuf {
        self.results_root
            .join(job_id.to_string())
            .join(tool.dir_name())
    }

    fn run_request(&self, job_id: JobId, tool: ToolName) -> RunRequest {
        RunRequest {
            input_path: self.input_path.clone(),
            output_path: self.output_dir(job_id, tool),
            max_resolution: self.max_resolution,
        }
    }
}

struct JobEntry {
    job: Job,
    request: JobRequest,
}

pub struct JobCoordinator {
    manager: Arc<ReconstructionManager>,
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    mode: DispatchMode,
    shutdown: CancellationToken,
}

impl JobCoordinator {
    pub fn new(manager: Arc<ReconstructionManager>) -> Self {
        Self {
            manager,
            jobs: RwLock::new(HashMap::new()),
            mode: DispatchMode::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Tie the coordinator to an external shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn manager(&self) -> &Arc<ReconstructionManager> {
        &self.manager
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Stop dispatching further tools. Running engines finish and are recorded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Validate `tools` and register a new job in the `starting` state.
    pub async fn create_job(
        &self,
        tools: &[String],
        request: JobRequest,
    ) -> Result<JobId, CoordinatorError> {
        if tools.is_empty() {
            return Err(CoordinatorError::NoTools);
        }

        let (valid, invalid): (Vec<_>, Vec<_>) = tools
            .iter()
            .map(|name| name.parse::<ToolName>().map_err(|_| name.clone()))
            .partition(Result::is_ok);

        if !invalid.is_empty() {
            let invalid = invalid.into_iter().filter_map(Result::err).collect();
            return Err(CoordinatorError::UnsupportedTool(invalid));
        }

        let job_id = Uuid::new_v4();
        let job = Job::new(job_id, valid.into_iter().filter_map(Result::ok));
        info!(%job_id, tools = ?job.tools.names(), "Created job");

        self.jobs
            .write()
            .await
            .insert(job_id, JobEntry { job, request });
        Ok(job_id)
    }

    /// Create a job and execute it on a background task.
    pub async fn submit(
        self: &Arc<Self>,
        tools: &[String],
        request: JobRequest,
    ) -> Result<JobId, CoordinatorError> {
        let job_id = self.create_job(tools, request).await?;

        let coordinator = Arc::clone(self);
        tokio::spawn(
            async move {
                if let Err(e) = coordinator.execute(job_id).await {
                    error!(error = %e, "Job execution failed");
                }
            }
            .instrument(info_span!("job", job_id = %job_id)),
        );

        Ok(job_id)
    }

    /// Run every tool of a `starting` job and settle its aggregate status.
    pub async fn execute(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let (tools, request) = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job_id)
                .ok_or(CoordinatorError::JobNotFound(job_id))?;
            if entry.job.status != JobStatus::Starting {
                warn!(%job_id, status = ?entry.job.status, "Job already executed");
                return Ok(entry.job.status);
            }
            entry.job.status = JobStatus::Running;
            (entry.job.tools.names(), entry.request.clone())
        };

        info!(%job_id, mode = ?self.mode, "Executing job");

        match self.mode {
            DispatchMode::Sequential => {
                for tool in tools {
                    self.dispatch(job_id, tool, &request).await;
                }
            }
            DispatchMode::Parallel => {
                join_all(
                    tools
                        .into_iter()
                        .map(|tool| self.dispatch(job_id, tool, &request)),
                )
                .await;
            }
        }

        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&job_id)
            .ok_or(CoordinatorError::JobNotFound(job_id))?;
        let status = entry.job.settle().unwrap_or(entry.job.status);

        info!(%job_id, ?status, "Job finished");
        Ok(status)
    }

    /// Snapshot of a job.
    pub async fn status(&self, job_id: JobId) -> Result<Job, CoordinatorError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.job.clone())
            .ok_or(CoordinatorError::JobNotFound(job_id))
    }

    /// Snapshot of a job whose every tool completed.
    pub async fn results(&self, job_id: JobId) -> Result<Job, CoordinatorError> {
        let job = self.status(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(CoordinatorError::JobNotComplete {
                job_id,
                status: job.status,
            });
        }
        Ok(job)
    }

    async fn dispatch(&self, job_id: JobId, tool: ToolName, request: &JobRequest) {
        if self.shutdown.is_cancelled() {
            warn!(%job_id, %tool, "Shutting down, tool not dispatched");
            self.update_tool(job_id, tool, |status| {
                status.fail(CANCELLED_BEFORE_DISPATCH, None)
            })
            .await;
            return;
        }

        self.update_tool(job_id, tool, ToolStatus::start).await;

        let run_request = request.run_request(job_id, tool);
        let (reporter, mut updates) = ProgressReporter::channel(tool);

        let outcome = {
            let run = self.manager.run_tool(tool, &run_request, &reporter);
            tokio::pin!(run);

            loop {
                tokio::select! {
                    biased;
                    Some(update) = updates.recv() => self.apply_progress(job_id, update).await,
                    outcome = &mut run => break outcome,
                }
            }
        };

        while let Ok(update) = updates.try_recv() {
            self.apply_progress(job_id, update).await;
        }

        match outcome {
            Ok(ToolRunReport {
                status: ToolState::Completed,
                output_file,
                metrics,
                ..
            }) => {
                self.update_tool(job_id, tool, |status| status.complete(output_file, metrics))
                    .await;
            }
            Ok(report) => {
                let error = report
                    .error
                    .unwrap_or_else(|| "reconstruction failed".to_string());
                self.update_tool(job_id, tool, |status| {
                    status.fail(error, Some(report.metrics))
                })
                .await;
            }
            Err(e) => {
                warn!(%job_id, %tool, error = %e, "Tool has no adapter");
                self.update_tool(job_id, tool, |status| status.fail(e.to_string(), None))
                    .await;
            }
        }
    }

    async fn apply_progress(&self, job_id: JobId, update: ProgressUpdate) {
        self.update_tool(job_id, update.tool, |status| status.advance(update.percent))
            .await;
    }

    /// Apply a single transition under the registry lock.
    async fn update_tool<F>(&self, job_id: JobId, tool: ToolName, transition: F)
    where
        F: FnOnce(&mut ToolStatus) -> bool,
    {
        let mut jobs = self.jobs.write().await;
        let Some(status) = jobs
            .get_mut(&job_id)
            .and_then(|entry| entry.job.tools.get_mut(tool))
        else {
            warn!(%job_id, %tool, "Update for unknown job or tool dropped");
            return;
        };

        if !transition(status) {
            debug!(%job_id, %tool, state = ?status.state(), "Transition ignored");
        }
    }
}
