//! The redeploy sequence: fetch, reset, install, collect static, restart.
//!
//! Steps run strictly in order and stop at the first failure. Nothing is
//! rolled back: a sequence that fails (or is killed) half-way leaves the
//! working tree and the service exactly as the last completed step left them.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use easyblog_core::config::DeployConfig;
use tracing::{error, info};

use crate::errlog::{ErrorLog, FailureEntry};
use crate::error::{DeployError, Result};
use crate::runner::{CommandOutput, CommandRunner, SystemRunner};

/// One external command of the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
}

impl Step {
    fn from_argv(name: &'static str, argv: &[String]) -> Result<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| DeployError::EmptyCommand {
            step: name.to_string(),
        })?;
        Ok(Self {
            name,
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Space-joined command line, for logs only.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Reject references that git could read as an option or that are obviously
/// not a ref/commit name. They come straight from a webhook body.
pub fn validate_reference(reference: &str) -> Result<()> {
    let ok = !reference.is_empty()
        && !reference.starts_with('-')
        && !reference.contains("..")
        && reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'));
    if ok {
        Ok(())
    } else {
        Err(DeployError::InvalidReference(reference.to_string()))
    }
}

/// Build the ordered step list for `reference`.
pub fn plan(config: &DeployConfig, reference: &str) -> Result<Vec<Step>> {
    validate_reference(reference)?;
    Ok(vec![
        Step {
            name: "fetch",
            program: "git".to_string(),
            args: vec![
                "fetch".to_string(),
                config.remote.clone(),
                reference.to_string(),
            ],
        },
        Step {
            name: "reset",
            program: "git".to_string(),
            args: vec![
                "reset".to_string(),
                "--hard".to_string(),
                reference.to_string(),
            ],
        },
        Step::from_argv("install", &config.install_command)?,
        Step::from_argv("collectstatic", &config.collect_static_command)?,
        Step::from_argv("restart", &config.restart_command)?,
    ])
}

/// Runs the redeploy sequence in `repo_dir` and logs failed steps.
pub struct Redeployer {
    config: DeployConfig,
    repo_dir: PathBuf,
    error_log: ErrorLog,
    runner: Arc<dyn CommandRunner>,
}

impl Redeployer {
    pub fn new(config: DeployConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: DeployConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            repo_dir: PathBuf::from(&config.repo_dir),
            error_log: ErrorLog::new(&config.error_log),
            config,
            runner,
        }
    }

    /// Redeploy `reference`. On failure the step is logged to the error log
    /// and a generic [`DeployError::StepFailed`] is returned. A rejected
    /// reference or an empty configured command is logged as an abort.
    pub fn run(&self, reference: &str) -> Result<()> {
        let steps = match plan(&self.config, reference) {
            Ok(steps) => steps,
            Err(e) => {
                error!(%reference, error = %e, "redeploy aborted before the first step");
                if let Err(log_err) = self.error_log.append_abort(reference, &e.to_string()) {
                    error!(path = %self.error_log.path().display(), error = %log_err, "cannot write redeploy error log");
                }
                return Err(e);
            }
        };
        info!(%reference, repo = %self.repo_dir.display(), steps = steps.len(), "redeploy started");

        for step in &steps {
            let command_line = step.command_line();
            info!(step = step.name, command = %command_line, "redeploy step");

            let output = match self.runner.run(&self.repo_dir, &step.program, &step.args) {
                Ok(output) if output.success => continue,
                Ok(output) => output,
                Err(e) => CommandOutput {
                    success: false,
                    status: format!("failed to start: {e}"),
                    ..CommandOutput::default()
                },
            };

            error!(step = step.name, command = %command_line, status = %output.status, "redeploy step failed");
            let entry = FailureEntry {
                at: Utc::now(),
                step: step.name,
                command_line: &command_line,
                cwd: &self.repo_dir,
                output: &output,
            };
            if let Err(e) = self.error_log.append(&entry) {
                error!(path = %self.error_log.path().display(), error = %e, "cannot write redeploy error log");
            }
            return Err(DeployError::StepFailed {
                step: step.name.to_string(),
                command: command_line,
            });
        }

        info!(%reference, "redeploy finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex;

    /// Records every call; fails the call whose program+first arg matches `fail_on`.
    struct ScriptedRunner {
        fail_on: Option<(&'static str, &'static str)>,
        spawn_error: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(fail_on: Option<(&'static str, &'static str)>) -> Arc<Self> {
            Arc::new(Self {
                fail_on,
                spawn_error: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, _cwd: &Path, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
            let line = format!("{program} {}", args.join(" "));
            self.calls.lock().unwrap().push(line);
            let first = args.first().map(String::as_str).unwrap_or("");
            if matches!(self.fail_on, Some((p, a)) if p == program && a == first) {
                if self.spawn_error {
                    return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"));
                }
                return Ok(CommandOutput {
                    success: false,
                    status: "exit status: 1".into(),
                    stdout: "Resolving dependencies...".into(),
                    stderr: "Because easyblog depends on nothing-real, version solving failed."
                        .into(),
                });
            }
            Ok(CommandOutput {
                success: true,
                status: "exit status: 0".into(),
                ..CommandOutput::default()
            })
        }
    }

    fn config(dir: &Path) -> DeployConfig {
        DeployConfig {
            repo_dir: dir.display().to_string(),
            error_log: dir.join("redeploy-error.log").display().to_string(),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn plan_is_ordered() {
        let steps = plan(&DeployConfig::default(), "abc123").unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name).collect();
        assert_eq!(names, ["fetch", "reset", "install", "collectstatic", "restart"]);
        assert_eq!(steps[0].command_line(), "git fetch origin abc123");
        assert_eq!(steps[1].command_line(), "git reset --hard abc123");
    }

    #[test]
    fn empty_command_is_rejected() {
        let cfg = DeployConfig {
            restart_command: Vec::new(),
            ..DeployConfig::default()
        };
        assert!(matches!(
            plan(&cfg, "abc123"),
            Err(DeployError::EmptyCommand { ref step }) if step == "restart"
        ));
    }

    #[test]
    fn unsafe_references_are_rejected() {
        for bad in ["", "--upload-pack=evil", "a..b", "abc;rm -rf", "tag with space"] {
            assert!(validate_reference(bad).is_err(), "{bad:?} accepted");
        }
        for good in ["abc123", "v1.2.3", "refs/tags/v1.2.3", "release_2026-10"] {
            assert!(validate_reference(good).is_ok(), "{good:?} rejected");
        }
    }

    #[test]
    fn successful_sequence_runs_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(None);
        Redeployer::with_runner(config(dir.path()), runner.clone())
            .run("abc123")
            .unwrap();
        assert_eq!(runner.calls().len(), 5);
        assert!(!dir.path().join("redeploy-error.log").exists());
    }

    #[test]
    fn failure_short_circuits_and_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(Some(("poetry", "install")));
        let err = Redeployer::with_runner(config(dir.path()), runner.clone())
            .run("abc123")
            .unwrap_err();

        assert!(matches!(err, DeployError::StepFailed { ref step, .. } if step == "install"));
        // collectstatic and restart never ran.
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| !c.starts_with("systemctl")));

        let log = std::fs::read_to_string(dir.path().join("redeploy-error.log")).unwrap();
        assert!(log.contains("command: poetry install --only main --sync"));
        assert!(log.contains("Resolving dependencies..."));
        assert!(log.contains("version solving failed"));
    }

    #[test]
    fn first_step_failure_runs_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(Some(("git", "fetch")));
        assert!(Redeployer::with_runner(config(dir.path()), runner.clone())
            .run("abc123")
            .is_err());
        assert_eq!(runner.calls(), vec!["git fetch origin abc123"]);
    }

    #[test]
    fn spawn_error_counts_as_step_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: Some(("systemctl", "--user")),
            spawn_error: true,
            calls: Mutex::new(Vec::new()),
        });
        let err = Redeployer::with_runner(config(dir.path()), runner)
            .run("abc123")
            .unwrap_err();
        assert!(matches!(err, DeployError::StepFailed { ref step, .. } if step == "restart"));
        let log = std::fs::read_to_string(dir.path().join("redeploy-error.log")).unwrap();
        assert!(log.contains("failed to start"));
    }

    #[test]
    fn invalid_reference_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(None);
        assert!(matches!(
            Redeployer::with_runner(config(dir.path()), runner.clone()).run("-x"),
            Err(DeployError::InvalidReference(_))
        ));
        assert!(runner.calls().is_empty());
        let log = std::fs::read_to_string(dir.path().join("redeploy-error.log")).unwrap();
        assert!(log.contains("aborted"));
    }

    #[test]
    fn empty_command_is_logged_as_abort() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = DeployConfig {
            install_command: Vec::new(),
            ..config(dir.path())
        };
        let runner = ScriptedRunner::new(None);
        assert!(matches!(
            Redeployer::with_runner(cfg, runner.clone()).run("abc123"),
            Err(DeployError::EmptyCommand { .. })
        ));
        assert!(runner.calls().is_empty());
        let log = std::fs::read_to_string(dir.path().join("redeploy-error.log")).unwrap();
        assert!(log.contains("Empty command configured for step install"));
    }
}
