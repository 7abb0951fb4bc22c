//! External process invocation
//!
//! Subjects are realized by running external commands. A non-zero exit status
//! is data, not an error: callers read [`ProcessOutput::success`] and decide.
//! Dropping an in-flight invocation kills the child, which is how shutdown
//! requests unblock a pending command.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ProcessOutput {
    /// Whether the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs external commands.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    /// Run `program` with `args`, waiting at most `deadline`.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the process cannot be spawned and
    /// [`Error::DeadlineExceeded`] when it outlives `deadline`. A non-zero exit
    /// is returned as `Ok`.
    async fn invoke(&self, program: &str, args: &[String], deadline: Duration)
        -> Result<ProcessOutput>;
}

/// [`ProcessInvoker`] backed by `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CmdProcessInvoker;

#[async_trait]
impl ProcessInvoker for CmdProcessInvoker {
    async fn invoke(
        &self,
        program: &str,
        args: &[String],
        deadline: Duration,
    ) -> Result<ProcessOutput> {
        debug!(program, ?args, "invoking external command");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(deadline, child.wait_with_output())
            .await
            .map_err(|_| Error::DeadlineExceeded {
                operation: format!("command {program}"),
                deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            })??;

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
