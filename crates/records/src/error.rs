//! Record table error types.

use thiserror::Error;

/// Record table operation errors.
///
/// Validation variants (batch/size/transition) are never retried; they are
/// surfaced to the caller as rejected requests. `Database` covers transient
/// storage faults and is safe to retry from the trigger adapter.
#[derive(Debug, Error)]
pub enum RecordsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("batch size {batch_size} exceeds aggregate max size {max_size}")]
    BatchTooLarge { batch_size: u64, max_size: u64 },

    #[error(
        "aggregate {aggregate} at {current_size} bytes cannot take {batch_size} more (max {max_size})"
    )]
    MaxSizeExceeded {
        aggregate: String,
        current_size: u64,
        batch_size: u64,
        max_size: u64,
    },

    #[error("aggregate {aggregate} at {current_size} bytes is below min size {min_size}")]
    MinSizeNotReached {
        aggregate: String,
        current_size: u64,
        min_size: u64,
    },

    #[error("aggregate {aggregate}: invalid state transition {from} -> {to}")]
    InvalidStateTransition {
        aggregate: String,
        from: String,
        to: String,
    },

    #[error("aggregate {aggregate} is not accepting pieces (state {state})")]
    NotIngesting { aggregate: String, state: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("lost conditional write race: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RecordsError {
    /// Classify a sqlx error on paths where constraint violations carry
    /// meaning: unique violations become `AlreadyExists`, foreign-key
    /// violations become `ForeignKey`, everything else stays `Database`.
    pub fn classify(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = error {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let message = db_err.message().to_string();

            // PostgreSQL 23503 / SQLite "FOREIGN KEY constraint failed"
            if code == "23503" || message.contains("FOREIGN KEY constraint") {
                return Self::ForeignKey(message);
            }
            // PostgreSQL 23505 / SQLite "UNIQUE constraint failed: ..."
            if code == "23505" || message.contains("UNIQUE constraint") {
                return Self::AlreadyExists(message);
            }
        }
        Self::Database(error)
    }
}

/// Result type for record table operations.
pub type RecordsResult<T> = std::result::Result<T, RecordsError>;
