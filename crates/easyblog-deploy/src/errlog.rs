//! Append-only log of failed redeploy steps.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;
use crate::runner::CommandOutput;

/// One failed step, as written to the log.
#[derive(Debug, Clone)]
pub struct FailureEntry<'a> {
    pub at: DateTime<Utc>,
    pub step: &'a str,
    pub command_line: &'a str,
    pub cwd: &'a Path,
    pub output: &'a CommandOutput,
}

impl FailureEntry<'_> {
    pub fn render(&self) -> String {
        format!(
            "=== {at} redeploy step {step} failed\n\
             command: {cmd}\n\
             cwd: {cwd}\n\
             status: {status}\n\
             --- stdout ---\n{stdout}\n\
             --- stderr ---\n{stderr}\n\n",
            at = self.at.to_rfc3339_opts(SecondsFormat::Secs, true),
            step = self.step,
            cmd = self.command_line,
            cwd = self.cwd.display(),
            status = self.output.status,
            stdout = self.output.stdout.trim_end(),
            stderr = self.output.stderr.trim_end(),
        )
    }
}

/// File the redeploy executor appends failure entries to.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry`, creating the file and its parent directory if needed.
    pub fn append(&self, entry: &FailureEntry<'_>) -> Result<()> {
        self.write(&entry.render())
    }

    /// Record a redeploy that stopped before its first step ran.
    pub fn append_abort(&self, reference: &str, reason: &str) -> Result<()> {
        self.write(&format!(
            "=== {at} redeploy of {reference:?} aborted\n{reason}\n\n",
            at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }

    fn write(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
