//! Accelerator detection and capability probing.

use reconbench_schemas::{GpuInfo, GpuStatus};
use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::process::{CommandRunner, Invocation, InvocationError};

/// Bound applied to the accelerator query and to required-binary probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound applied to optional helper probes.
pub const HELPER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

static GPU_ENABLED: OnceLock<bool> = OnceLock::new();

/// Publish the detected accelerator flag for every process spawned afterwards.
/// Only the first call has an effect.
pub fn publish_gpu_enabled(enabled: bool) {
    if GPU_ENABLED.set(enabled).is_ok() {
        info!(gpu_enabled = enabled, "Published accelerator flag");
    }
}

/// The published accelerator flag, if detection already ran.
pub fn published_gpu_enabled() -> Option<bool> {
    GPU_ENABLED.get().copied()
}

/// Errors raised while checking whether an engine is usable.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to inspect {}: {source}", path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Detects accelerators by querying the vendor tool once and caching the answer.
pub struct GpuProbe {
    runner: Arc<dyn CommandRunner>,
    query: Invocation,
    status: OnceCell<GpuStatus>,
}

impl GpuProbe {
    /// Probe using `nvidia-smi`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_program(runner, "nvidia-smi")
    }

    /// Probe using a different query program that accepts the `nvidia-smi` arguments.
    pub fn with_program(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        let query = Invocation::new(program)
            .args([
                "--query-gpu=name,memory.total,driver_version",
                "--format=csv,noheader,nounits",
            ])
            .timeout(PROBE_TIMEOUT);

        Self {
            runner,
            query,
            status: OnceCell::new(),
        }
    }

    /// Run the query and publish the result. Never fails: any problem degrades to
    /// [`GpuStatus::unavailable`].
    #[instrument(skip_all, fields(program = self.query.program()))]
    pub async fn detect(&self) -> GpuStatus {
        let status = match self.runner.run(&self.query).await {
            Ok(output) if output.success() => {
                let gpus = parse_gpu_lines(&output.stdout);
                if gpus.is_empty() {
                    warn!(stdout = %output.stdout.trim(), "Accelerator query returned no devices");
                }
                GpuStatus::from_gpus(gpus)
            }
            Ok(output) => {
                warn!(
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "Accelerator query failed, running in CPU mode"
                );
                GpuStatus::unavailable()
            }
            Err(e) => {
                warn!(error = %e, "Accelerator query unavailable, running in CPU mode");
                GpuStatus::unavailable()
            }
        };

        info!(
            available = status.available,
            count = status.count,
            name = %status.name,
            "Accelerator detection finished"
        );
        publish_gpu_enabled(status.available);
        status
    }

    /// Cached snapshot, detecting on first use.
    pub async fn status(&self) -> GpuStatus {
        self.status.get_or_init(|| self.detect()).await.clone()
    }
}

/// Parse `name, memory, driver` lines. Malformed lines are skipped.
fn parse_gpu_lines(stdout: &str) -> Vec<GpuInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split(',').map(str::trim);
            let name = parts.next().filter(|name| !name.is_empty())?;
            let memory = parts.next()?;
            let driver = parts.next().filter(|driver| !driver.is_empty())?;

            let memory_mb = memory
                .parse::<u64>()
                .ok()
                .or_else(|| memory.parse::<f64>().ok().map(|mb| mb as u64))?;

            Some(GpuInfo {
                name: name.to_string(),
                memory_mb,
                driver_version: driver.to_string(),
            })
        })
        .collect()
}
