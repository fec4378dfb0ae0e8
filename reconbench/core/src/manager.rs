//! Registry of engine adapters and measured single-tool runs.

use futures::future::join_all;
use reconbench_schemas::{Metrics, ToolInfo, ToolName, ToolState};
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tracing::{info, instrument, warn};

use crate::{
    adapters::{default_adapters, RunRequest, ToolAdapter},
    artifact::count_elements,
    process::CommandRunner,
    progress::ProgressReporter,
    system::process_rss_bytes,
};

/// Returned when a tool has no registered adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tool: {0}")]
pub struct UnknownTool(pub ToolName);

/// Uniform outcome of [`ReconstructionManager::run_tool`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRunReport {
    pub tool: ToolName,
    pub status: ToolState,
    pub output_file: Option<String>,
    pub error: Option<String>,
    pub metrics: Metrics,
}

/// Owns one adapter per tool and wraps runs with timing, memory and point-count
/// measurement. Read-only after construction and shared as `Arc`.
pub struct ReconstructionManager {
    adapters: BTreeMap<ToolName, Arc<dyn ToolAdapter>>,
}

impl ReconstructionManager {
    pub fn new(adapters: impl IntoIterator<Item = Arc<dyn ToolAdapter>>) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|adapter| (adapter.name(), adapter))
            .collect();
        Self { adapters }
    }

    /// Manager with every supported engine using default executables.
    pub fn with_defaults(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(default_adapters(runner))
    }

    pub fn is_registered(&self, tool: ToolName) -> bool {
        self.adapters.contains_key(&tool)
    }

    pub fn tools(&self) -> impl Iterator<Item = ToolName> + '_ {
        self.adapters.keys().copied()
    }

    /// Run one tool and measure it. Engine failures are reported in the returned
    /// [`ToolRunReport`]; only an unregistered tool is an error.
    #[instrument(skip(self, request, progress), fields(tool = %tool))]
    pub async fn run_tool(
        &self,
        tool: ToolName,
        request: &RunRequest,
        progress: &ProgressReporter,
    ) -> Result<ToolRunReport, UnknownTool> {
        let adapter = self.adapters.get(&tool).ok_or(UnknownTool(tool))?;

        info!(
            input = %request.input_path.display(),
            output = %request.output_path.display(),
            max_resolution = request.max_resolution,
            "Starting reconstruction"
        );
        let rss_before = process_rss_bytes();
        let started = Instant::now();

        let result = adapter.run(request, progress).await;
        let elapsed = started.elapsed();

        if !result.success {
            warn!(error = ?result.error, "Reconstruction failed. Elapsed time: {:.2?}", elapsed);
            return Ok(ToolRunReport {
                tool,
                status: ToolState::Failed,
                output_file: None,
                error: Some(
                    result
                        .error
                        .unwrap_or_else(|| "reconstruction failed".to_string()),
                ),
                metrics: Metrics::failed(elapsed),
            });
        }

        let memory = match (rss_before, process_rss_bytes()) {
            (Some(before), Some(after)) => after.saturating_sub(before),
            _ => 0,
        };

        let points = match result.output_file.clone() {
            Some(path) => tokio::task::spawn_blocking(move || count_elements(&path))
                .await
                .unwrap_or(0),
            None => 0,
        };

        info!(points, "Reconstruction completed. Elapsed time: {:.2?}", elapsed);

        Ok(ToolRunReport {
            tool,
            status: ToolState::Completed,
            output_file: result.output_file.map(|path| path.display().to_string()),
            error: None,
            metrics: Metrics::new(elapsed, memory, points, true),
        })
    }

    /// Probe every adapter concurrently. A probe that errors or panics only marks
    /// its own entry unavailable.
    pub async fn tool_status(&self) -> BTreeMap<ToolName, ToolInfo> {
        let probes = self.adapters.iter().map(|(name, adapter)| {
            let name = *name;
            let adapter = Arc::clone(adapter);
            async move {
                let probe = {
                    let adapter = Arc::clone(&adapter);
                    tokio::spawn(async move { adapter.check_availability().await })
                };

                let info = match probe.await {
                    Ok(Ok(available)) => describe(adapter.as_ref(), available),
                    Ok(Err(e)) => {
                        warn!(tool = %name, error = %e, "Availability check failed");
                        probe_failure(adapter.as_ref(), e.to_string())
                    }
                    Err(e) => {
                        warn!(tool = %name, error = %e, "Availability check panicked");
                        probe_failure(adapter.as_ref(), format!("availability check aborted: {e}"))
                    }
                };
                (name, info)
            }
        });

        join_all(probes).await.into_iter().collect()
    }
}

fn describe(adapter: &dyn ToolAdapter, available: bool) -> ToolInfo {
    ToolInfo {
        available,
        version: adapter.version().to_string(),
        category: adapter.category(),
        description: adapter.description().to_string(),
        error: None,
    }
}

fn probe_failure(adapter: &dyn ToolAdapter, error: String) -> ToolInfo {
    ToolInfo {
        available: false,
        version: "unknown".to_string(),
        error: Some(error),
        ..describe(adapter, false)
    }
}
