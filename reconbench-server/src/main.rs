use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use reconbench_core::{
    manager::ReconstructionManager,
    process::{CommandRunner, ProcessRunner},
};
use reconbench_server::{app, ApiContext, Config, Directories, EngineSettings};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Reconstruction benchmark service running several photogrammetry engines
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// API key required in the X-API-Key header (optional)
    #[arg(long, env = "RECONBENCH_API_KEY")]
    api_key: Option<String>,

    /// Host address to bind to
    #[arg(long, env = "RECONBENCH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "RECONBENCH_PORT", default_value = "8000")]
    port: u16,

    /// Directory receiving uploaded images
    #[arg(long, env = "RECONBENCH_UPLOADS_DIR", default_value = "/tmp/uploads")]
    uploads_dir: PathBuf,

    /// Directory receiving reconstruction outputs
    #[arg(long, env = "RECONBENCH_RESULTS_DIR", default_value = "/tmp/results")]
    results_dir: PathBuf,

    /// Directory holding `<dataset>/<resolution>` image sets
    #[arg(long, env = "RECONBENCH_DATASETS_DIR", default_value = "/app/datasets")]
    datasets_dir: PathBuf,

    /// Directory holding reference scenes for single-engine runs
    #[arg(long, env = "RECONBENCH_SCENES_DIR", default_value = "/data/360_scenes")]
    scenes_dir: PathBuf,

    /// Persist single-engine job records in this directory instead of memory
    #[arg(long, env = "RECONBENCH_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Run the tools of a job concurrently instead of one after another
    #[arg(long, env = "RECONBENCH_PARALLEL_TOOLS")]
    parallel_tools: bool,

    /// Accelerator query program
    #[arg(long, env = "RECONBENCH_GPU_QUERY", default_value = "nvidia-smi")]
    gpu_query: String,

    /// Container client used by single-engine runs
    #[arg(long, env = "RECONBENCH_DOCKER", default_value = "docker")]
    docker: String,

    /// Prefix of the engine container names
    #[arg(
        long,
        env = "RECONBENCH_CONTAINER_PREFIX",
        default_value = "photogrammetry-pipeline"
    )]
    container_prefix: String,

    /// Logging level (info, debug, trace)
    #[arg(long, env = "RECONBENCH_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = Level::from_str(cli.log_level.to_lowercase().as_str()).unwrap_or(Level::INFO);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true),
        )
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), "Starting reconbench server");

    if let Err(e) = run(cli).await {
        error!(error = ?e, "Server failed");
        std::process::exit(1);
    }

    info!("Reconbench server shutdown complete");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let dirs = Directories {
        uploads: cli.uploads_dir,
        results: cli.results_dir,
        datasets: cli.datasets_dir,
        scenes: cli.scenes_dir,
        store: cli.store_dir,
    };
    let engines = EngineSettings {
        gpu_query: cli.gpu_query,
        docker: cli.docker,
        container_prefix: cli.container_prefix,
    };
    let config = Config::try_new(
        &cli.host,
        cli.port,
        cli.api_key,
        dirs,
        cli.parallel_tools,
        engines,
    )
    .context("Configuration error")?;

    info!(
        addr = %config.addr,
        dispatch_mode = ?config.dispatch_mode,
        authenticated = config.api_key.is_some(),
        persistent_records = config.dirs.store.is_some(),
        "Configuration validated successfully"
    );

    for dir in [&config.dirs.uploads, &config.dirs.results] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let shutdown_token = CancellationToken::new();
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let manager = Arc::new(ReconstructionManager::with_defaults(Arc::clone(&runner)));
    let addr = config.addr;
    let context = Arc::new(ApiContext::new(
        config,
        manager,
        runner,
        shutdown_token.clone(),
    ));

    // detect once at startup so every engine process sees the GPU flag
    let gpu = context.gpu.status().await;
    info!(
        available = gpu.available,
        name = %gpu.name,
        compile_flags = ?gpu.compile_flags(),
        "Accelerator status"
    );

    tokio::spawn(handle_shutdown_signals(shutdown_token.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(addr = %addr, "Server started, press Ctrl+C to stop");
    axum::serve(listener, app(context))
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_token))
        .await
        .context("Server error during shutdown")?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Handler function for shutdown signals
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    // stops the coordinator from dispatching further tools
    shutdown_token.cancel();
}

/// Returns a future that resolves when the shutdown signal is received
async fn shutdown_signal_handler(token: CancellationToken) {
    token.cancelled().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Give in-flight requests some time to complete
    tokio::time::sleep(Duration::from_secs(1)).await;
}
