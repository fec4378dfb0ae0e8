use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode, str::FromStr};
use tracing::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod inspect;
mod local_exec;

/// Reconbench CLI for running and comparing 3D reconstruction engines
#[derive(Debug, Parser)]
#[command(name = "reconbench", version, about, long_about = None)]
struct Args {
    /// Logging level (info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconstruct one image set with several engines
    Run {
        /// Directory containing the input images
        #[arg(short, long)]
        input: PathBuf,

        /// Results root; each tool writes to <output>/<job id>/<tool>
        #[arg(short, long)]
        output: PathBuf,

        /// Comma separated engines, e.g. COLMAP,OpenMVS
        #[arg(short, long, value_delimiter = ',', required = true)]
        tools: Vec<String>,

        /// Longest image side handed to the engines
        #[arg(long, default_value_t = 2048)]
        max_resolution: u32,

        /// Run the engines concurrently instead of one after another
        #[arg(long)]
        parallel: bool,
    },

    /// Show which engines are installed
    Tools,

    /// Show the detected accelerator and the matching build flags
    Gpu {
        /// Accelerator query program
        #[arg(long, default_value = "nvidia-smi")]
        query: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let log_level = Level::from_str(args.log_level.to_lowercase().as_str()).unwrap_or(Level::INFO);
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    match args.command {
        Commands::Run {
            input,
            output,
            tools,
            max_resolution,
            parallel,
        } => {
            let options = local_exec::RunOptions {
                input,
                output,
                tools,
                max_resolution,
                parallel,
            };
            local_exec::run_local(options).await
        }
        Commands::Tools => inspect::print_tools().await.map(|_| ExitCode::SUCCESS),
        Commands::Gpu { query } => inspect::print_gpu(query).await.map(|_| ExitCode::SUCCESS),
    }
}
