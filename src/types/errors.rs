//! Error types for reelsmith.

use thiserror::Error;

/// Default result type for reelsmith.
pub type ReelResult<T> = Result<T, ReelError>;

/// Errors raised by reelsmith.
///
/// Failures that originate in external collaborators (executors, scorers,
/// fetchers) are contained by the orchestration core and never surface from
/// a batch; only caller misuse such as [`ReelError::UnknownTask`] escapes.
#[derive(Error, Debug)]
pub enum ReelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "cli")]
    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{0}' appears more than once in the batch")]
    DuplicateTask(String),

    #[error("Executor for '{0}' failed: {1}")]
    ExecutorFailed(String, String),

    #[error("Timeout while executing '{0}'")]
    ExecutorTimeout(String),

    #[error("Failed to fetch candidate '{0}': {1}")]
    FetchFailed(String, String),

    #[error("Relevance scorer failed: {0}")]
    ScorerFailed(String),

    #[error("{0}")]
    Other(String),
}

impl ReelError {
    /// Creates a generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Creates a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a caller programming error rather than an
    /// external failure.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownTask(_) | Self::DuplicateTask(_)
        )
    }
}
