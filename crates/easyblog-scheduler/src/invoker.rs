//! Action execution.
//!
//! [`ActionInvoker`] is the seam between the scheduler loop and the outside
//! world. [`CommandInvoker`] runs the task's program as a child process and
//! captures stdout and stderr into one text.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::registry::TaskAction;
use crate::truncate::truncate_output;

/// A failed action. Carries whatever the action printed before failing.
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct ActionFailure {
    /// Captured output up to the failure; may be empty.
    pub output: String,
    /// What went wrong (exit status, spawn error, timeout, …).
    pub detail: String,
}

impl ActionFailure {
    pub fn new(output: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            detail: detail.into(),
        }
    }

    /// Captured text followed by the error detail. Never empty.
    pub fn report(&self) -> String {
        let output = self.output.trim_end();
        if output.is_empty() {
            format!("error: {}", self.detail)
        } else {
            format!("{output}\nerror: {}", self.detail)
        }
    }
}

/// Runs a task action with already-resolved arguments.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Returns the captured output on success.
    async fn invoke(
        &self,
        action: &TaskAction,
        args: &[String],
    ) -> std::result::Result<String, ActionFailure>;
}

/// Spawns `action.program` directly (no shell) and waits for it.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    max_output_chars: usize,
}

impl CommandInvoker {
    pub fn new(max_output_chars: usize) -> Self {
        Self { max_output_chars }
    }
}

impl Default for CommandInvoker {
    fn default() -> Self {
        Self::new(easyblog_core::config::DEFAULT_MAX_OUTPUT_CHARS)
    }
}

#[async_trait]
impl ActionInvoker for CommandInvoker {
    async fn invoke(
        &self,
        action: &TaskAction,
        args: &[String],
    ) -> std::result::Result<String, ActionFailure> {
        debug!(program = %action.program, ?args, "invoking action");

        let mut cmd = Command::new(&action.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child dies with the wait future, so a timeout really stops it.
            .kill_on_drop(true);
        if let Some(ref dir) = action.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            ActionFailure::new("", format!("failed to spawn {}: {e}", action.program))
        })?;

        let output = match tokio::time::timeout(action.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ActionFailure::new(
                    "",
                    format!("failed to wait for {}: {e}", action.program),
                ))
            }
            Err(_elapsed) => {
                return Err(ActionFailure::new(
                    "",
                    format!(
                        "{} timed out after {}s and was killed",
                        action.program,
                        action.timeout.as_secs()
                    ),
                ))
            }
        };

        let mut captured = strip_text(&output.stdout);
        let stderr = strip_text(&output.stderr);
        if !stderr.is_empty() {
            if !captured.is_empty() && !captured.ends_with('\n') {
                captured.push('\n');
            }
            captured.push_str(&stderr);
        }
        let captured = truncate_output(&captured, self.max_output_chars);

        if output.status.success() {
            Ok(captured)
        } else {
            Err(ActionFailure::new(
                captured,
                format!("{} exited with {}", action.program, output.status),
            ))
        }
    }
}

/// Strip ANSI escape codes and convert bytes to a UTF-8 string.
fn strip_text(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean).into_owned()
}
