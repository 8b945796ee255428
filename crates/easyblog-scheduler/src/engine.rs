use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::{
    error::Result,
    invoker::{ActionFailure, ActionInvoker},
    registry::{TaskDefinition, TaskRegistry},
    schedule::{not_due_sleep, time_until_due},
    store::TaskRunStore,
    types::NO_OUTPUT,
};

/// Upper bound on the back-off after the run store failed.
const STORE_RETRY_MAX: StdDuration = StdDuration::from_secs(60);

/// Result of one due check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// The action ran and its record was persisted.
    Ran {
        run_id: i64,
        success: bool,
        /// Always the task interval.
        wait: StdDuration,
    },
    /// Not due yet; `wait` already includes the slack.
    NotDue { wait: StdDuration },
}

impl Poll {
    pub fn wait(&self) -> StdDuration {
        match self {
            Poll::Ran { wait, .. } | Poll::NotDue { wait } => *wait,
        }
    }
}

/// The loop driving a single task. Owns no state besides its collaborators;
/// the run store is the only memory between cycles.
pub struct TaskLoop {
    task: Arc<TaskDefinition>,
    store: Arc<dyn TaskRunStore>,
    invoker: Arc<dyn ActionInvoker>,
}

impl TaskLoop {
    pub fn new(
        task: Arc<TaskDefinition>,
        store: Arc<dyn TaskRunStore>,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            task,
            store,
            invoker,
        }
    }

    /// One due check at `now`: run the action if due, record the outcome, and
    /// say how long to sleep.
    ///
    /// Action errors are part of a successful poll. Only run store errors are
    /// returned as `Err`.
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<Poll> {
        let name = &self.task.name;
        let last = self.store.latest_run(name)?;
        if let Some(remaining) =
            time_until_due(last.map(|r| r.started_at), self.task.interval, now)
        {
            return Ok(Poll::NotDue {
                wait: not_due_sleep(remaining),
            });
        }

        let run_id = self.store.create_run(name, now)?;
        info!(task = %name, run_id, "running task");

        // Producers may shell out (git), so keep them off the async workers.
        let task = Arc::clone(&self.task);
        let resolved = tokio::task::spawn_blocking(move || task.resolve_args())
            .await
            .unwrap_or_else(|e| Err(format!("argument resolution aborted: {e}")));
        let result = match resolved {
            Ok(args) => self.invoker.invoke(&self.task.action, &args).await,
            Err(detail) => Err(ActionFailure::new(
                "",
                format!("argument producer failed: {detail}"),
            )),
        };

        let (success, output) = match result {
            Ok(out) if out.trim().is_empty() => (true, NO_OUTPUT.to_string()),
            Ok(out) => (true, out),
            Err(failure) => {
                warn!(task = %name, run_id, error = %failure, "task failed");
                (false, failure.report())
            }
        };

        let finished_at = Utc::now().max(now);
        self.store.update_run(run_id, finished_at, success, &output)?;
        info!(task = %name, run_id, success, "task run recorded");

        Ok(Poll::Ran {
            run_id,
            success,
            wait: self.task.interval_std(),
        })
    }

    /// Poll forever until `shutdown` broadcasts `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.task.name.clone();
        let retry = self.task.interval_std().min(STORE_RETRY_MAX);
        info!(task = %name, every_secs = self.task.interval.num_seconds(), "task loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Dropping an in-flight poll kills the child; its open record is
            // closed as interrupted on the next start.
            let polled = tokio::select! {
                polled = self.poll(Utc::now()) => polled,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(task = %name, "task loop shutting down during a run");
                        break;
                    }
                    continue;
                }
            };
            let wait = match polled {
                Ok(poll) => poll.wait(),
                Err(e) => {
                    error!(task = %name, error = %e, retry_secs = retry.as_secs(), "run store failed; retrying next cycle");
                    retry
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(task = %name, "task loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Hosts one [`TaskLoop`] per registered task, each on its own tokio task, so a
/// slow or hung action never delays another task.
pub struct SchedulerEngine {
    registry: TaskRegistry,
    store: Arc<dyn TaskRunStore>,
    invoker: Arc<dyn ActionInvoker>,
}

impl SchedulerEngine {
    pub fn new(
        registry: TaskRegistry,
        store: Arc<dyn TaskRunStore>,
        invoker: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            registry,
            store,
            invoker,
        }
    }

    /// Run every task loop until `shutdown` broadcasts `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(tasks = self.registry.len(), "scheduler engine started");
        if self.registry.is_empty() {
            warn!("no tasks configured; scheduler is idle");
        }

        if let Err(e) = self.store.close_interrupted(Utc::now()) {
            error!(error = %e, "could not close interrupted runs");
        }

        let mut loops = JoinSet::new();
        for task in self.registry.tasks() {
            let task_loop = TaskLoop::new(
                Arc::clone(task),
                Arc::clone(&self.store),
                Arc::clone(&self.invoker),
            );
            loops.spawn(task_loop.run(shutdown.clone()));
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task loop aborted");
            }
        }
        info!("scheduler engine stopped");
    }
}
