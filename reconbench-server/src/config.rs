use reconbench_core::coordinator::DispatchMode;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use thiserror::Error;

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API key cannot be empty")]
    EmptyApiKey,

    #[error("Port must be non-zero")]
    InvalidPort,

    #[error("Invalid host address: {0}")]
    InvalidHost(String),

    #[error("Directory {0} is configured for more than one purpose")]
    SharedDirectory(PathBuf),
}

/// Filesystem layout of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    /// Uploaded image sets, one directory per upload id
    pub uploads: PathBuf,
    /// Per-job, per-tool reconstruction outputs
    pub results: PathBuf,
    /// Datasets addressed as `<datasets>/<dataset>/<resolution>`
    pub datasets: PathBuf,
    /// Reference scenes of the single-engine service
    pub scenes: PathBuf,
    /// Job record directory; records are kept in memory when unset
    pub store: Option<PathBuf>,
}

/// External programs used by the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub gpu_query: String,
    pub docker: String,
    pub container_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            gpu_query: "nvidia-smi".to_string(),
            docker: "docker".to_string(),
            container_prefix: "photogrammetry-pipeline".to_string(),
        }
    }
}

/// Configuration for the server
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub api_key: Option<String>,
    pub dirs: Directories,
    pub dispatch_mode: DispatchMode,
    pub engines: EngineSettings,
}

impl Config {
    /// Create a new config with validation
    pub fn try_new(
        host: &str,
        port: u16,
        api_key: Option<String>,
        dirs: Directories,
        parallel_tools: bool,
        engines: EngineSettings,
    ) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(host.to_string()))?;

        if api_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
            return Err(ConfigError::EmptyApiKey);
        }

        // uploads, results and records are written; each needs its own directory
        let written = [Some(&dirs.uploads), Some(&dirs.results), dirs.store.as_ref()];
        for (index, dir) in written.iter().enumerate() {
            let Some(dir) = dir else { continue };
            if written[index + 1..].iter().flatten().any(|other| other == dir) {
                return Err(ConfigError::SharedDirectory(dir.to_path_buf()));
            }
        }

        let dispatch_mode = if parallel_tools {
            DispatchMode::Parallel
        } else {
            DispatchMode::Sequential
        };

        Ok(Self {
            addr: SocketAddr::new(ip, port),
            api_key,
            dirs,
            dispatch_mode,
            engines,
        })
    }
}
