use thiserror::Error;

/// Errors raised while assembling the process-wide configuration.
///
/// Everything in here is fatal at startup: the feature that hit it must not
/// start serving.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
