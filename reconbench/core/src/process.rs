//! External process execution shared by every engine adapter.
//!
//! Adapters describe each stage as an [`Invocation`] and hand it to a
//! [`CommandRunner`]. The default [`ProcessRunner`] spawns the program with piped
//! output, publishes the accelerator flag into the child environment and applies
//! the invocation's timeout.

use async_trait::async_trait;
use std::{
    fmt,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::probe;

/// Maximum stdout or stderr size captured per stream (4 MiB).
const MAX_OUTPUT_BYTES: u64 = 4 * 1024 * 1024;

/// How long output pipes may stay open after the child exited. Background
/// processes started by an engine can inherit them.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Number of trailing stderr lines kept in a failure diagnostic.
const DIAGNOSTIC_LINES: usize = 5;

/// Upper bound on the stderr excerpt kept in a failure diagnostic.
const DIAGNOSTIC_CHARS: usize = 500;

/// Environment variable carrying the accelerator flag into child processes.
pub const GPU_ENABLED_ENV: &str = "GPU_ENABLED";

/// One external program call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", elapsed.as_secs())]
    Timeout { program: String, elapsed: Duration },

    #[error("{program} exited with {code}: {stderr}")]
    Failed {
        program: String,
        code: String,
        stderr: String,
    },

    #[error("{0}")]
    Stage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl InvocationError {
    /// Build a [`InvocationError::Failed`] from a non-zero exit.
    pub fn failed(invocation: &Invocation, output: &CommandOutput) -> Self {
        let code = output
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());

        InvocationError::Failed {
            program: invocation.program().to_string(),
            code,
            stderr: stderr_tail(&output.stderr),
        }
    }
}

/// Last few non-empty lines of `stderr`, capped in length.
pub fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let tail = lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..].join("\n");

    if tail.chars().count() <= DIAGNOSTIC_CHARS {
        return tail;
    }
    let skip = tail.chars().count() - DIAGNOSTIC_CHARS;
    tail.chars().skip(skip).collect()
}

/// Executes external programs on behalf of the engine adapters.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion. A non-zero exit is not an error here;
    /// inspect [`CommandOutput::success`].
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, InvocationError>;

    /// Run `invocation` and turn a non-zero exit into [`InvocationError::Failed`].
    async fn run_checked(
        &self,
        invocation: &Invocation,
    ) -> Result<CommandOutput, InvocationError> {
        let output = self.run(invocation).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(InvocationError::failed(invocation, &output))
        }
    }

    /// Whether `invocation` can be spawned and exits successfully. Spawn failures
    /// and timeouts count as unavailable.
    async fn probe(&self, invocation: &Invocation) -> bool {
        match self.run(invocation).await {
            Ok(output) => output.success(),
            Err(e) => {
                debug!(program = invocation.program(), error = %e, "Probe failed");
                false
            }
        }
    }
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    env: Vec<(String, String)>,
    drain_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            drain_grace: PIPE_DRAIN_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how long output is still collected once the child has exited.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Extra environment applied to every spawned process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, InvocationError> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(gpu_enabled) = probe::published_gpu_enabled() {
            cmd.env(GPU_ENABLED_ENV, gpu_enabled.to_string());
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        debug!(command = %invocation, "Spawning process");
        let start = Instant::now();
        let deadline = invocation
            .timeout
            .map(|limit| tokio::time::Instant::now() + limit);

        let mut child = cmd.spawn().map_err(|source| InvocationError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let stdout = Captured::default();
        let stderr = Captured::default();
        let mut stdout_task = tokio::spawn(read_stream(child.stdout.take(), stdout.clone()));
        let mut stderr_task = tokio::spawn(read_stream(child.stderr.take(), stderr.clone()));

        let status = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => status?,
                Err(_elapsed) => {
                    // dropping `child` kills it
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(InvocationError::Timeout {
                        program: invocation.program.clone(),
                        elapsed: start.elapsed(),
                    });
                }
            },
            None => child.wait().await?,
        };

        let mut drain_until = tokio::time::Instant::now() + self.drain_grace;
        if let Some(deadline) = deadline {
            drain_until = drain_until.min(deadline);
        }
        let drained = tokio::time::timeout_at(drain_until, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            warn!(
                command = %invocation,
                "Output pipes still open after exit, keeping captured output"
            );
            stdout_task.abort();
            stderr_task.abort();
        }
        let duration = start.elapsed();

        debug!(
            command = %invocation,
            exit_code = ?status.code(),
            "Process finished. Elapsed time: {:.2?}",
            duration
        );

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout.text(),
            stderr: stderr.text(),
            duration,
        })
    }
}

/// Output shared between a reader task and the runner, readable even if the
/// reader is aborted midway.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn extend(&self, chunk: &[u8]) {
        let mut buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let room = (MAX_OUTPUT_BYTES as usize).saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn text(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Read an output stream, keeping at most [`MAX_OUTPUT_BYTES`] and draining the rest.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>, captured: Captured) {
    let Some(mut h) = handle else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match h.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => captured.extend(&chunk[..n]),
        }
    }
}
