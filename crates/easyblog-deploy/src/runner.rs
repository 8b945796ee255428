//! External command execution for the redeploy steps.

use std::path::Path;
use std::process::Command;

/// Captured result of one finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Human-readable exit status ("exit status: 128", "signal: 9", …).
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one program to completion in a working directory.
///
/// `Err` means the program could not be started at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cwd: &Path, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Blocking [`CommandRunner`] on top of `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cwd: &Path, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).current_dir(cwd).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner
            .run(
                dir.path(),
                "sh",
                &["-c".to_string(), "echo hi; echo oops >&2; exit 2".to_string()],
            )
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(out.status.contains('2'));
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SystemRunner
            .run(dir.path(), "no-such-binary-easyblog", &[])
            .is_err());
    }
}
