use std::sync::Arc;

use thiserror::Error;

/// Error type produced by caller-supplied actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a submission did not settle with a value.
///
/// Cloneable so the same error can reach both the `on_error` callback and the
/// submission handle.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The action itself failed.
    #[error("action failed: {0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// The action was never invoked because a dependency failed or was cancelled.
    #[error("cancelled: dependency `{dependency}` did not complete")]
    Cancelled { dependency: String },

    /// The engine went away before the submission settled.
    #[error("queue dropped before the task settled")]
    Dropped,
}

impl TaskError {
    pub fn failed(error: BoxError) -> Self {
        TaskError::Failed(Arc::from(error))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
