//! Pipeline error types.

use barge_records::RecordsError;
use barge_store::StoreError;
use thiserror::Error;

/// Pipeline stage errors.
///
/// `Validation` and `NotFound` are surfaced to the trigger adapter as
/// rejected requests; the failure variants are safe to retry since stages
/// perform no partial mutation past a failed call.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("content store failure: {0}")]
    StoreFailed(String),

    #[error("queue failure: {0}")]
    QueueFailed(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl From<RecordsError> for PipelineError {
    fn from(error: RecordsError) -> Self {
        match error {
            RecordsError::BatchTooLarge { .. }
            | RecordsError::MaxSizeExceeded { .. }
            | RecordsError::MinSizeNotReached { .. }
            | RecordsError::InvalidStateTransition { .. }
            | RecordsError::NotIngesting { .. }
            | RecordsError::Validation(_) => Self::Validation(error.to_string()),
            RecordsError::NotFound(what) => Self::NotFound(what),
            other => Self::OperationFailed(other.to_string()),
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(key) => Self::NotFound(key),
            other => Self::StoreFailed(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
