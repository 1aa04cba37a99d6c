//! External tool invocation
//!
//! The processing tool is a black box driven by positional arguments. Each
//! call is sanitized, spawned without a shell, bounded by a wall-clock
//! timeout and reported as an immutable [`ToolInvocation`].

use crate::error::{Error, Result};
use crate::tool::sanitize::sanitize_args;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Exit code reported when no real exit status exists
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// How long to keep draining pipes after the process is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Success,
    NonZeroExit,
    TimedOut,
    SpawnFailed,
}

/// Why a process was never started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnFailure {
    MissingBinary,
    NotExecutable,
    /// An argument failed sanitization
    Rejected,
    Io,
}

/// Captured stdout/stderr of a successful invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A completed tool invocation. Consumed once via [`ToolInvocation::into_output`].
#[derive(Debug)]
pub struct ToolInvocation {
    args: Vec<String>,
    state: CompletionState,
    spawn_failure: Option<SpawnFailure>,
    exit_code: i32,
    stdout: String,
    stderr: String,
    elapsed: Duration,
    timeout: Option<Duration>,
}

impl ToolInvocation {
    /// Process ran to completion; state follows the exit code
    pub fn completed(
        args: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    ) -> Self {
        let state = if exit_code == 0 {
            CompletionState::Success
        } else {
            CompletionState::NonZeroExit
        };
        Self {
            args,
            state,
            spawn_failure: None,
            exit_code,
            stdout,
            stderr,
            elapsed,
            timeout: None,
        }
    }

    /// Process was killed after exceeding `timeout`
    pub fn timed_out(
        args: Vec<String>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            args,
            state: CompletionState::TimedOut,
            spawn_failure: None,
            exit_code: SENTINEL_EXIT_CODE,
            stdout,
            stderr,
            elapsed,
            timeout: Some(timeout),
        }
    }

    /// Process was never started
    pub fn spawn_failed(args: Vec<String>, failure: SpawnFailure, message: String) -> Self {
        Self {
            args,
            state: CompletionState::SpawnFailed,
            spawn_failure: Some(failure),
            exit_code: SENTINEL_EXIT_CODE,
            stdout: String::new(),
            stderr: message,
            elapsed: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn state(&self) -> CompletionState {
        self.state
    }

    pub fn spawn_failure(&self) -> Option<SpawnFailure> {
        self.spawn_failure
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn succeeded(&self) -> bool {
        self.state == CompletionState::Success
    }

    /// Classify the invocation into the error taxonomy.
    pub fn into_output(self) -> Result<ToolOutput> {
        match self.state {
            CompletionState::Success => Ok(ToolOutput {
                stdout: self.stdout,
                stderr: self.stderr,
            }),
            CompletionState::NonZeroExit => Err(Error::ToolExecution {
                exit_code: self.exit_code,
                stderr: self.stderr,
            }),
            CompletionState::TimedOut => Err(Error::ToolTimeout {
                seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
            }),
            CompletionState::SpawnFailed => match self.spawn_failure {
                Some(SpawnFailure::Rejected) => Err(Error::InvalidArgument {
                    reason: self.stderr,
                }),
                _ => Err(Error::ToolSpawn {
                    reason: self.stderr,
                }),
            },
        }
    }
}

/// Something that can execute the tool with an argument vector.
///
/// [`SystemRunner`] spawns the real binary; tests substitute their own.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> ToolInvocation;
}

/// Spawns the configured binary as a subprocess
pub struct SystemRunner {
    binary: PathBuf,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn check_binary(&self) -> std::result::Result<(), (SpawnFailure, String)> {
        if !self.binary.is_file() {
            return Err((
                SpawnFailure::MissingBinary,
                format!("PDF tool does not exist: {}", self.binary.display()),
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&self.binary)
                .map(|m| m.permissions().mode())
                .unwrap_or(0);
            if mode & 0o111 == 0 {
                return Err((
                    SpawnFailure::NotExecutable,
                    format!("PDF tool is not executable: {}", self.binary.display()),
                ));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, args: &[String]) -> ToolInvocation {
        if let Err((failure, message)) = self.check_binary() {
            return ToolInvocation::spawn_failed(args.to_vec(), failure, message);
        }

        let start = Instant::now();
        let mut child = match Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ToolInvocation::spawn_failed(
                    args.to_vec(),
                    SpawnFailure::Io,
                    format!("Failed to spawn PDF tool: {}", e),
                )
            }
        };

        let stdout = PipeDrain::start(child.stdout.take());
        let stderr = PipeDrain::start(child.stderr.take());

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => ToolInvocation::completed(
                args.to_vec(),
                status.code().unwrap_or(SENTINEL_EXIT_CODE),
                stdout.finish().await,
                stderr.finish().await,
                start.elapsed(),
            ),
            Ok(Err(e)) => ToolInvocation::spawn_failed(
                args.to_vec(),
                SpawnFailure::Io,
                format!("Failed to wait for PDF tool: {}", e),
            ),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill timed out PDF tool");
                }
                let stdout = stdout.finish().await;
                let mut stderr = stderr.finish().await;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!(
                    "PDF tool timed out after {}s",
                    self.timeout.as_secs()
                ));
                ToolInvocation::timed_out(
                    args.to_vec(),
                    stdout,
                    stderr,
                    start.elapsed(),
                    self.timeout,
                )
            }
        }
    }
}

/// Reads a child pipe into a shared buffer so partial output survives a kill.
struct PipeDrain {
    buffer: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeDrain {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let handle = reader.map(|mut reader| {
            let sink = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, handle }
    }

    /// Wait briefly for EOF, then take whatever was read.
    async fn finish(mut self) -> String {
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        let bytes = std::mem::take(&mut *self.buffer.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Sub-commands whose argument at the given index is a password
const SECRET_ARGS: &[(&str, usize)] = &[("protect", 3), ("unlock", 3)];

const REDACTED: &str = "***";

/// The argument vector with passwords masked, for logs and records
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut redacted = args.to_vec();
    if let Some(subcommand) = args.first() {
        for &(name, index) in SECRET_ARGS {
            if subcommand == name {
                if let Some(arg) = redacted.get_mut(index) {
                    *arg = REDACTED.to_string();
                }
            }
        }
    }
    redacted
}

/// Sanitizes and runs tool invocations, logging each one.
#[derive(Clone)]
pub struct ToolInvoker {
    runner: Arc<dyn CommandRunner>,
}

impl ToolInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Invoker backed by the real binary
    pub fn system(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self::new(Arc::new(SystemRunner::new(binary, timeout)))
    }

    /// Run the tool. A single unsafe argument aborts before anything is spawned.
    pub async fn invoke(&self, args: Vec<String>) -> ToolInvocation {
        if let Err(e) = sanitize_args(&args) {
            let reason = match e {
                Error::InvalidArgument { reason } => reason,
                other => other.to_string(),
            };
            tracing::warn!(
                subcommand = args.first().map(String::as_str).unwrap_or(""),
                reason = %reason,
                "Rejected PDF tool arguments"
            );
            return ToolInvocation::spawn_failed(redact_args(&args), SpawnFailure::Rejected, reason);
        }

        let redacted = redact_args(&args);
        tracing::info!(command = %redacted.join(" "), "Running PDF tool");
        let mut invocation = self.runner.run(&args).await;
        invocation.args = redacted;

        match invocation.state() {
            CompletionState::Success => tracing::debug!(
                elapsed_ms = invocation.elapsed().as_millis() as u64,
                "PDF tool finished"
            ),
            CompletionState::NonZeroExit => tracing::error!(
                exit_code = invocation.exit_code(),
                elapsed_ms = invocation.elapsed().as_millis() as u64,
                stderr = %invocation.stderr().trim(),
                "PDF tool failed"
            ),
            CompletionState::TimedOut => tracing::error!(
                elapsed_ms = invocation.elapsed().as_millis() as u64,
                "PDF tool timed out"
            ),
            CompletionState::SpawnFailed => tracing::error!(
                reason = %invocation.stderr(),
                "PDF tool could not be started"
            ),
        }

        invocation
    }

    /// Run the tool and classify the outcome.
    pub async fn run(&self, args: Vec<String>) -> Result<ToolOutput> {
        self.invoke(args).await.into_output()
    }
}
