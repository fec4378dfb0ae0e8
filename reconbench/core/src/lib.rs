//! # Reconbench Core
//!
//! Runs 3D reconstructions with several photogrammetry engines over the same
//! image set and reports their progress and run metrics side by side.
//!
//! Each engine is wrapped by a [`ToolAdapter`](adapters::ToolAdapter) that
//! drives its command-line stages as child processes. The
//! [`ReconstructionManager`](manager::ReconstructionManager) measures single
//! runs, and the [`JobCoordinator`](coordinator::JobCoordinator) fans a
//! request out over several engines while tracking per-tool state.
//!
//! ```rust,no_run
//! use reconbench_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> reconbench_core::Result<()> {
//! let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
//! let manager = Arc::new(ReconstructionManager::with_defaults(runner));
//! let coordinator = Arc::new(JobCoordinator::new(manager));
//!
//! let request = JobRequest::builder()
//!     .input_path("/data/scenes/garden/images")
//!     .results_root("/data/results")
//!     .build();
//! let job_id = coordinator.submit(&["COLMAP".to_string()], request).await?;
//! println!("{:?}", coordinator.status(job_id).await?);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod artifact;
pub mod coordinator;
pub mod error;
pub mod files;
pub mod legacy;
pub mod manager;
pub mod prelude;
pub mod probe;
pub mod process;
pub mod progress;
pub mod store;
pub mod system;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
