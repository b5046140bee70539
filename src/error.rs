use thiserror::Error;
use uuid::Uuid;

use crate::types::RunStatus;

pub type RunResult<T> = std::result::Result<T, RunError>;

/// Failures surfaced by the run orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("TestRun not found: {0}")]
    NotFound(Uuid),

    #[error("Test {id} is not in APPROVED/WAITING state (current: {status})")]
    InvalidState { id: Uuid, status: RunStatus },

    #[error("Canceled by user")]
    Cancelled,

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid run request: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(String),
}

impl RunError {
    /// Errors raised before the run entered RUNNING.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RunError::NotFound(_) | RunError::InvalidState { .. } | RunError::Validation(_)
        )
    }
}

/// Transport-level failure of a single request.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            SendError::InvalidRequest(err.to_string())
        } else {
            SendError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("no hardware sampler running for test {0}")]
    NotRunning(Uuid),

    #[error("hardware sampler failed: {0}")]
    Failed(String),
}
