use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context;
use futures::future::join_all;
use indicatif::ProgressStyle;
use reconbench_core::prelude::*;
use tracing::{info, info_span, warn, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub tools: Vec<String>,
    pub max_resolution: u32,
    pub parallel: bool,
}

/// Run one job through the coordinator, drawing a bar per tool, and print the
/// final job document. Fails the process unless every tool completed.
pub async fn run_local(options: RunOptions) -> anyhow::Result<ExitCode> {
    info!(
        input = %options.input.display(),
        tools = ?options.tools,
        "Running reconstruction locally"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());

    // publishes GPU_ENABLED for every engine process started below
    let gpu = GpuProbe::new(Arc::clone(&runner)).status().await;
    info!(available = gpu.available, name = %gpu.name, "Accelerator detected");

    let mode = if options.parallel {
        DispatchMode::Parallel
    } else {
        DispatchMode::Sequential
    };
    let manager = Arc::new(ReconstructionManager::with_defaults(runner));
    let coordinator = Arc::new(JobCoordinator::new(manager).with_mode(mode));

    let request = JobRequest::builder()
        .input_path(options.input)
        .results_root(options.output)
        .max_resolution(options.max_resolution)
        .build();
    let job_id = coordinator.create_job(&options.tools, request).await?;

    let execution = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(
            async move { coordinator.execute(job_id).await }
                .instrument(info_span!("job", %job_id)),
        )
    };

    let tools = coordinator.status(job_id).await?.tools.names();
    let watchers = tools.into_iter().map(|tool| {
        let coordinator = Arc::clone(&coordinator);
        let span = info_span!("tool", %tool);
        span.pb_set_style(&bar_style());
        span.pb_set_length(100);
        span.pb_set_message(&tool.to_string());
        async move { watch_tool(&coordinator, job_id, tool).await }.instrument(span)
    });
    join_all(watchers).await;

    let status = execution
        .await
        .context("job task aborted")??;
    let job = coordinator.status(job_id).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&job).context("failed to encode job")?
    );

    if status == JobStatus::Completed {
        info!(%job_id, "All tools completed");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(%job_id, ?status, "Job did not complete");
        Ok(ExitCode::FAILURE)
    }
}

/// Mirror one tool's progress onto the current span's bar until it finishes.
async fn watch_tool(coordinator: &JobCoordinator, job_id: JobId, tool: ToolName) {
    loop {
        let Ok(job) = coordinator.status(job_id).await else {
            return;
        };
        let Some(status) = job.tools.get(tool) else {
            return;
        };

        let span = Span::current();
        span.pb_set_position(u64::from(status.progress()));
        match status.state() {
            ToolState::Waiting => span.pb_set_message(&format!("{tool} waiting")),
            ToolState::Running => span.pb_set_message(&format!("{tool} running")),
            ToolState::Completed => {
                let points = status.metrics().map(|m| m.points).unwrap_or_default();
                info!(%tool, points, "Tool completed");
                return;
            }
            ToolState::Failed => {
                warn!(%tool, error = status.error().unwrap_or("unknown"), "Tool failed");
                return;
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}
