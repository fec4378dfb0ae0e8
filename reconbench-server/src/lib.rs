//! # Reconbench Server
//!
//! HTTP front end of reconbench. It exposes two services on one listener:
//!
//! - the multi-tool service, which fans a reconstruction request out over
//!   several engines through the [`JobCoordinator`] and reports per-tool progress
//! - the single-engine service under `/legacy`, which runs one containerized
//!   engine per request and persists its record in a [`JobStore`](reconbench_core::store::JobStore)
//!
//! Every route except `/api/health` is protected by the optional `X-API-Key`.

use axum::Router;
use reconbench_core::{
    coordinator::JobCoordinator,
    legacy::{LegacyConfig, LegacyRunner},
    manager::ReconstructionManager,
    probe::GpuProbe,
    process::CommandRunner,
    store::{FileStore, JobStore, KeyValueStore, MemoryStore},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub mod api;
pub mod config;
pub mod error;

pub use config::{Config, ConfigError, Directories, EngineSettings};
pub use error::ApiError;

pub type ApiContextRef = Arc<ApiContext>;

pub struct ApiContext {
    pub config: Config,
    pub coordinator: Arc<JobCoordinator>,
    pub gpu: GpuProbe,
    pub legacy: Arc<LegacyRunner>,
}

impl ApiContext {
    pub fn new(
        config: Config,
        manager: Arc<ReconstructionManager>,
        runner: Arc<dyn CommandRunner>,
        shutdown: CancellationToken,
    ) -> Self {
        let coordinator = JobCoordinator::new(manager)
            .with_mode(config.dispatch_mode)
            .with_shutdown(shutdown);
        let gpu = GpuProbe::with_program(runner.clone(), config.engines.gpu_query.clone());

        let backend: Arc<dyn KeyValueStore> = match &config.dirs.store {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        };
        let legacy_config = LegacyConfig::builder()
            .uploads_dir(config.dirs.uploads.clone())
            .scenes_dir(config.dirs.scenes.clone())
            .results_dir(config.dirs.results.clone())
            .docker(config.engines.docker.clone())
            .container_prefix(config.engines.container_prefix.clone())
            .build();
        let legacy = LegacyRunner::new(legacy_config, JobStore::new(backend), runner);

        Self {
            config,
            coordinator: Arc::new(coordinator),
            gpu,
            legacy: Arc::new(legacy),
        }
    }
}

/// Complete application router with state applied.
pub fn app(context: ApiContextRef) -> Router {
    Router::new()
        .merge(api::router(Arc::clone(&context)))
        .with_state(context)
}
