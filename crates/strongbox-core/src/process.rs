//! External command execution.
//!
//! Dump and sync tools are always invoked with an explicit argument vector,
//! never through a shell. Every child is spawned with `kill_on_drop`, so a
//! deadline or cancellation that drops the waiting future also kills the
//! process.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;

use crate::cancel::{CancelSignal, Interrupted, bounded};
use crate::error::ToolError;
use crate::secret::SecretString;

/// Default deadline for a single tool invocation
pub const DEFAULT_TOOL_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// Captured stderr is capped; tools can be chatty on failure
const STDERR_LIMIT: usize = 8 * 1024;

/// A program plus its argument vector and extra environment
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, SecretString)>,
    deadline: Duration,
}

/// Output of a successful invocation
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            deadline: DEFAULT_TOOL_DEADLINE,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Pass a secret through the child's environment
    #[must_use]
    pub fn secret_env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.env.push((key.into(), value));
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn deadline_duration(&self) -> Duration {
        self.deadline
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            command.env(key, value.expose_as_str());
        }
        command
    }

    /// Run to completion, capturing stdout and stderr
    pub async fn output(&self, cancel: &CancelSignal) -> Result<ToolOutput, ToolError> {
        tracing::debug!(program = %self.program, args = ?self.args, "Running tool");

        let child = self.command().spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = bounded(self.deadline, cancel, child.wait_with_output())
            .await
            .map_err(|interrupted| self.interrupted(interrupted))?
            .map_err(|source| ToolError::Io {
                program: self.program.clone(),
                source,
            })?;

        let stderr = tail(&String::from_utf8_lossy(&output.stderr));
        check_status(&self.program, output.status, &stderr)?;
        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
        })
    }

    /// Spawn with stdout left for the caller to stream. Stderr is drained
    /// on a background task; pass the handle to [`finish`](Self::finish).
    pub fn spawn_streaming(&self) -> Result<StreamingChild, ToolError> {
        tracing::debug!(program = %self.program, args = ?self.args, "Spawning tool");

        let mut child = self.command().spawn().map_err(|source| ToolError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let stderr = child.stderr.take().map(drain_stderr);
        Ok(StreamingChild {
            program: self.program.clone(),
            child,
            stderr,
        })
    }

    /// Map a deadline or cancellation onto this tool's error
    pub fn interrupted(&self, interrupted: Interrupted) -> ToolError {
        match interrupted {
            Interrupted::TimedOut(after) => ToolError::TimedOut {
                program: self.program.clone(),
                after,
            },
            Interrupted::Cancelled => ToolError::Cancelled {
                program: self.program.clone(),
            },
        }
    }
}

/// A running child whose stdout the caller consumes
#[derive(Debug)]
pub struct StreamingChild {
    program: String,
    pub child: Child,
    stderr: Option<JoinHandle<String>>,
}

impl StreamingChild {
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Wait for exit once stdout has been consumed
    pub async fn finish(mut self) -> Result<(), ToolError> {
        let status = self.child.wait().await.map_err(|source| ToolError::Io {
            program: self.program.clone(),
            source,
        })?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        check_status(&self.program, status, &stderr)
    }
}

fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Failed to read tool stderr");
        }
        tail(&String::from_utf8_lossy(&buf))
    })
}

fn check_status(program: &str, status: ExitStatus, stderr: &str) -> Result<(), ToolError> {
    if status.success() {
        return Ok(());
    }
    Err(ToolError::Failed {
        program: program.to_string(),
        code: status.code(),
        stderr: stderr.trim().to_string(),
    })
}

/// Keep the last `STDERR_LIMIT` bytes, on a char boundary
fn tail(text: &str) -> String {
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
