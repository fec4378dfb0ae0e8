//! Prelude module that exports commonly used types and functions.
//!
//! `use reconbench_core::prelude::*;` brings in everything needed to register
//! engines, submit jobs and poll their state.

pub use crate::{Error, Result};

// Engines
pub use crate::adapters::{
    default_adapters, AliceVision, Colmap, OpenMvs, OpenSfm, Pmvs2, RunRequest, RunResult,
    ToolAdapter,
};
pub use crate::manager::{ReconstructionManager, ToolRunReport, UnknownTool};

// Jobs
pub use crate::coordinator::{CoordinatorError, DispatchMode, JobCoordinator, JobRequest};
pub use crate::progress::{ProgressReporter, ProgressUpdate};

// External programs
pub use crate::probe::{GpuProbe, ProbeError};
pub use crate::process::{CommandOutput, CommandRunner, Invocation, InvocationError, ProcessRunner};

// Single-engine service
pub use crate::legacy::{LegacyConfig, LegacyError, LegacyRunner, QueuedReconstruction};
pub use crate::store::{FileStore, JobStore, KeyValueStore, MemoryStore, StoreError};

pub use reconbench_schemas::*;
