use thiserror::Error;

/// Errors surfaced by the redeploy executor.
///
/// Callers only learn *that* the redeploy failed and at which step; the
/// captured output lives in the error log.
#[derive(Debug, Error)]
pub enum DeployError {
    /// A step exited non-zero or could not be spawned. Later steps did not run.
    #[error("Redeploy failed at step {step}: {command}")]
    StepFailed { step: String, command: String },

    /// The reference would not be a safe git argument.
    #[error("Invalid reference: {0:?}")]
    InvalidReference(String),

    /// A configured command is an empty argv list.
    #[error("Empty command configured for step {step}")]
    EmptyCommand { step: String },

    /// The error log could not be written.
    #[error("Error log unavailable: {0}")]
    Log(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeployError>;
