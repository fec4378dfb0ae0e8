use anyhow::Context;
use reconbench_core::{
    manager::ReconstructionManager,
    probe::GpuProbe,
    process::{CommandRunner, ProcessRunner},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use reconbench_schemas::GpuStatus;

/// Print the availability listing of every engine as JSON.
pub async fn print_tools() -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let manager = ReconstructionManager::with_defaults(runner);

    debug!("Probing engines");
    let listing = manager.tool_status().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&listing).context("failed to encode tool listing")?
    );
    Ok(())
}

#[derive(Serialize)]
struct GpuReport<'a> {
    #[serde(flatten)]
    status: &'a GpuStatus,
    compile_flags: &'static [&'static str],
}

/// Print the accelerator snapshot and the engine build flags matching it.
pub async fn print_gpu(query: String) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let status = GpuProbe::with_program(runner, query).status().await;

    let report = GpuReport {
        status: &status,
        compile_flags: status.compile_flags(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode GPU status")?
    );
    Ok(())
}
