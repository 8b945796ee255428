use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
///
/// Action failures are not in here: a task that exits non-zero is an
/// ordinary outcome recorded in its run record (see [`crate::invoker::ActionFailure`]).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The run store cannot be used (poisoned lock, unreadable row, …).
    #[error("Run store unavailable: {0}")]
    Store(String),

    /// Two task definitions share a name.
    #[error("Duplicate task name: {name}")]
    DuplicateTask { name: String },

    /// Recurrence interval below one second.
    #[error("Invalid interval for task {name}: {secs}s (must be at least 1s)")]
    InvalidInterval { name: String, secs: i64 },

    /// Any other problem with a task definition.
    #[error("Invalid task {name}: {reason}")]
    InvalidTask { name: String, reason: String },

    /// No run record with the given ID exists in the store.
    #[error("Run not found: {id}")]
    RunNotFound { id: i64 },
}

impl SchedulerError {
    /// True for errors that come from the task configuration rather than the
    /// runtime. These abort startup.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateTask { .. }
                | SchedulerError::InvalidInterval { .. }
                | SchedulerError::InvalidTask { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
