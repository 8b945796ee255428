//! Static task definitions.
//!
//! The registry is built once at startup, from `[[tasks]]` in the config or
//! programmatically, and is read-only afterwards.

use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::format::{Item, StrftimeItems};
use chrono::{Duration, Utc};
use easyblog_core::config::{ArgConfig, SchedulerConfig, TaskConfig};
use tracing::info;

use crate::error::{Result, SchedulerError};

/// Longest accepted interval (ten years).
pub const MAX_INTERVAL_SECS: i64 = 10 * 366 * 24 * 60 * 60;

/// Zero-argument value source evaluated at dispatch time.
pub type Producer = Arc<dyn Fn() -> std::result::Result<String, String> + Send + Sync>;

/// One task argument.
#[derive(Clone)]
pub enum TaskArg {
    /// Fixed at registration.
    Literal(String),
    /// Re-evaluated on every dispatch (current commit, today's date, …).
    Producer(Producer),
}

impl TaskArg {
    pub fn literal(value: impl Into<String>) -> Self {
        TaskArg::Literal(value.into())
    }

    pub fn producer<F>(f: F) -> Self
    where
        F: Fn() -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        TaskArg::Producer(Arc::new(f))
    }

    pub fn resolve(&self) -> std::result::Result<String, String> {
        match self {
            TaskArg::Literal(value) => Ok(value.clone()),
            TaskArg::Producer(produce) => produce(),
        }
    }
}

impl fmt::Debug for TaskArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskArg::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            TaskArg::Producer(_) => f.write_str("Producer(<fn>)"),
        }
    }
}

/// External program a task runs.
#[derive(Debug, Clone)]
pub struct TaskAction {
    pub program: String,
    pub working_dir: Option<PathBuf>,
    /// The child is killed once this elapses; the run is recorded as failed.
    pub timeout: StdDuration,
}

impl TaskAction {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            timeout: StdDuration::from_secs(easyblog_core::config::DEFAULT_TASK_TIMEOUT_SECS),
        }
    }
}

/// A named recurring unit of work.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub action: TaskAction,
    pub args: Vec<TaskArg>,
    pub interval: Duration,
}

impl TaskDefinition {
    /// Resolve every argument for one dispatch. The first failing producer
    /// aborts the dispatch.
    pub fn resolve_args(&self) -> std::result::Result<Vec<String>, String> {
        self.args
            .iter()
            .enumerate()
            .map(|(i, arg)| arg.resolve().map_err(|e| format!("argument {i}: {e}")))
            .collect()
    }

    /// Interval as a std duration for sleeping. Registration guarantees >= 1s.
    pub fn interval_std(&self) -> StdDuration {
        self.interval.to_std().unwrap_or(StdDuration::from_secs(1))
    }
}

/// Read-only set of task definitions with unique names.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<TaskDefinition>>,
    names: HashSet<String>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Fails on a duplicate name or an interval under one second
    /// or above [`MAX_INTERVAL_SECS`].
    pub fn register(
        &mut self,
        name: &str,
        action: TaskAction,
        interval: Duration,
        args: Vec<TaskArg>,
    ) -> Result<Arc<TaskDefinition>> {
        if name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        if interval.num_seconds() <= 0 || interval.num_seconds() > MAX_INTERVAL_SECS {
            return Err(SchedulerError::InvalidInterval {
                name: name.to_string(),
                secs: interval.num_seconds(),
            });
        }
        if !self.names.insert(name.to_string()) {
            return Err(SchedulerError::DuplicateTask {
                name: name.to_string(),
            });
        }

        let task = Arc::new(TaskDefinition {
            name: name.to_string(),
            action,
            args,
            interval,
        });
        info!(task = %name, every_secs = interval.num_seconds(), program = %task.action.program, "task registered");
        self.tasks.push(Arc::clone(&task));
        Ok(task)
    }

    /// Build the registry from `[[tasks]]` config entries.
    pub fn from_config(tasks: &[TaskConfig], defaults: &SchedulerConfig) -> Result<Self> {
        let mut registry = Self::new();
        for cfg in tasks {
            let args = cfg
                .args
                .iter()
                .map(|arg| arg_from_config(&cfg.name, arg))
                .collect::<Result<Vec<_>>>()?;
            let action = TaskAction {
                program: cfg.command.clone(),
                working_dir: cfg.working_dir.as_ref().map(PathBuf::from),
                timeout: StdDuration::from_secs(
                    cfg.timeout_secs.unwrap_or(defaults.default_timeout_secs),
                ),
            };
            let interval = Duration::try_seconds(cfg.every_secs).ok_or_else(|| {
                SchedulerError::InvalidInterval {
                    name: cfg.name.clone(),
                    secs: cfg.every_secs,
                }
            })?;
            registry.register(&cfg.name, action, interval, args)?;
        }
        Ok(registry)
    }

    pub fn tasks(&self) -> &[Arc<TaskDefinition>] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&Arc<TaskDefinition>> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn arg_from_config(task: &str, arg: &ArgConfig) -> Result<TaskArg> {
    Ok(match arg.clone() {
        ArgConfig::Literal(value) => TaskArg::Literal(value),
        ArgConfig::Env { env } => TaskArg::producer(move || {
            std::env::var(&env).map_err(|_| format!("environment variable {env} is not set"))
        }),
        ArgConfig::Timestamp { timestamp } => {
            if StrftimeItems::new(&timestamp).any(|item| matches!(item, Item::Error)) {
                return Err(SchedulerError::InvalidTask {
                    name: task.to_string(),
                    reason: format!("invalid timestamp pattern {timestamp:?}"),
                });
            }
            TaskArg::producer(move || {
                let mut out = String::new();
                write!(out, "{}", Utc::now().format(&timestamp))
                    .map_err(|_| format!("cannot format timestamp with {timestamp:?}"))?;
                Ok(out)
            })
        }
        ArgConfig::GitRev { git_rev } => TaskArg::producer(move || git_head(&git_rev)),
    })
}

/// `git rev-parse HEAD` in `repo`.
fn git_head(repo: &str) -> std::result::Result<String, String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo)
        .output()
        .map_err(|e| format!("failed to run git in {repo}: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "git rev-parse HEAD failed in {repo}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn task_cfg(name: &str, every_secs: i64) -> TaskConfig {
        TaskConfig {
            name: name.to_string(),
            command: "true".to_string(),
            args: Vec::new(),
            every_secs,
            working_dir: None,
            timeout_secs: None,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = TaskRegistry::from_config(
            &[task_cfg("ping", 60), task_cfg("ping", 120)],
            &SchedulerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTask { ref name } if name == "ping"));
        assert!(err.is_config());
    }

    #[test]
    fn non_positive_intervals_are_rejected() {
        for secs in [0, -5] {
            let err = TaskRegistry::from_config(&[task_cfg("ping", secs)], &SchedulerConfig::default())
                .unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidInterval { secs: s, .. } if s == secs));
        }
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        for secs in [MAX_INTERVAL_SECS + 1, i64::MAX] {
            let err = TaskRegistry::from_config(&[task_cfg("ping", secs)], &SchedulerConfig::default())
                .unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidInterval { secs: s, .. } if s == secs));
        }
        let ok = TaskRegistry::from_config(
            &[task_cfg("yearly", MAX_INTERVAL_SECS)],
            &SchedulerConfig::default(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn sub_second_interval_is_rejected() {
        let mut registry = TaskRegistry::new();
        let err = registry
            .register("fast", TaskAction::new("true"), Duration::milliseconds(500), vec![])
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidInterval { .. }));
    }

    #[test]
    fn config_timeout_falls_back_to_default() {
        let mut with_timeout = task_cfg("backup", 3600);
        with_timeout.timeout_secs = Some(10);
        let registry = TaskRegistry::from_config(
            &[task_cfg("ping", 60), with_timeout],
            &SchedulerConfig {
                default_timeout_secs: 99,
                ..SchedulerConfig::default()
            },
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("ping").unwrap().action.timeout, StdDuration::from_secs(99));
        assert_eq!(registry.get("backup").unwrap().action.timeout, StdDuration::from_secs(10));
    }

    #[test]
    fn producers_run_on_every_resolution() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = TaskDefinition {
            name: "ping".into(),
            action: TaskAction::new("echo"),
            args: vec![
                TaskArg::literal("run"),
                TaskArg::producer(move || Ok(counter.fetch_add(1, Ordering::SeqCst).to_string())),
            ],
            interval: Duration::seconds(60),
        };

        assert_eq!(task.resolve_args().unwrap(), vec!["run", "0"]);
        assert_eq!(task.resolve_args().unwrap(), vec!["run", "1"]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_producer_names_the_argument() {
        let task = TaskDefinition {
            name: "ping".into(),
            action: TaskAction::new("echo"),
            args: vec![TaskArg::literal("a"), TaskArg::producer(|| Err("boom".into()))],
            interval: Duration::seconds(60),
        };
        assert_eq!(task.resolve_args().unwrap_err(), "argument 1: boom");
    }

    #[test]
    fn env_producer_reads_at_dispatch_time() {
        let arg = arg_from_config(
            "t",
            &ArgConfig::Env {
                env: "EASYBLOG_TEST_REGISTRY_VAR".into(),
            },
        )
        .unwrap();
        std::env::remove_var("EASYBLOG_TEST_REGISTRY_VAR");
        assert!(arg.resolve().is_err());
        std::env::set_var("EASYBLOG_TEST_REGISTRY_VAR", "blog");
        assert_eq!(arg.resolve().unwrap(), "blog");
    }

    #[test]
    fn timestamp_pattern_is_validated_up_front() {
        let ok = arg_from_config(
            "t",
            &ArgConfig::Timestamp {
                timestamp: "%Y".into(),
            },
        )
        .unwrap();
        assert_eq!(ok.resolve().unwrap().len(), 4);

        let err = arg_from_config(
            "t",
            &ArgConfig::Timestamp {
                timestamp: "%Y-%".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTask { .. }));
    }
}
