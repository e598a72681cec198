//! Worker error types.

use reelgen_models::Stage;
use reelgen_queue::QueueError;
use reelgen_services::ServiceError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

pub type StageResult<T> = Result<T, StageError>;

/// Error from a stage collaborator, the render farm, or the job record store.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// The render farm did not report completion within the maximum wait.
    /// Worded so it never reads as a transient timeout.
    #[error("render {render_id} did not finish within {waited_secs}s")]
    RenderTimedOut { render_id: String, waited_secs: u64 },

    #[error("render failed: {0}")]
    RenderFailed(String),

    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_render_timeout(&self) -> bool {
        matches!(self, StageError::RenderTimedOut { .. })
    }
}

/// Configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No executor registered for the {0} stage")]
    MissingStage(Stage),

    #[error("More than one executor registered for the {0} stage")]
    DuplicateStage(Stage),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_timeout_message() {
        let err = StageError::RenderTimedOut {
            render_id: "r-1".to_string(),
            waited_secs: 600,
        };
        assert_eq!(err.to_string(), "render r-1 did not finish within 600s");
        assert!(err.is_render_timeout());
        assert!(!err.to_string().to_lowercase().contains("timeout"));
    }

    #[test]
    fn test_config_error_names_stage() {
        let err = ConfigError::MissingStage(Stage::Captions);
        assert_eq!(err.to_string(), "No executor registered for the captions stage");
    }
}
