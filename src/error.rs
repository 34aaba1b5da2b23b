//! Error types for the letter workflow engine.

use std::time::Duration;

use crate::letters::state::LetterStatus;
use crate::workflow::policy::Action;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timed out after {waited:?} waiting for the write lock")]
    LockTimeout { waited: Duration },
}

/// Typed failures of a workflow operation.
///
/// Every variant is terminal for the attempt except [`WorkflowError::Concurrency`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Permission denied for {action}: {reason}")]
    PermissionDenied { action: Action, reason: String },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: LetterStatus, to: LetterStatus },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    #[error("Storage failure: {0}")]
    Storage(DatabaseError),
}

impl WorkflowError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn denied(action: Action, reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            action,
            reason: reason.into(),
        }
    }

    /// Only lock contention is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }

    /// Stable machine-readable code for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Precondition(_) => "precondition",
            Self::Conflict(_) => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Concurrency(_) => "concurrency",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<DatabaseError> for WorkflowError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::LockTimeout { waited } => {
                Self::Concurrency(format!("write lock not acquired within {waited:?}"))
            }
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseError::Constraint(msg) => Self::Conflict(msg),
            other => Self::Storage(other),
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery to {topic} failed: {reason}")]
    SendFailed { topic: String, reason: String },

    #[error("Delivery to {topic} timed out after {timeout:?}")]
    Timeout { topic: String, timeout: Duration },

    #[error("Event queue is closed")]
    QueueClosed,
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_becomes_retryable_concurrency_error() {
        let err = WorkflowError::from(DatabaseError::LockTimeout {
            waited: Duration::from_millis(50),
        });
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "concurrency");
    }

    #[test]
    fn missing_row_becomes_not_found() {
        let err = WorkflowError::from(DatabaseError::NotFound {
            entity: "letter".into(),
            id: "9".into(),
        });
        assert_eq!(err.kind(), "not_found");
        assert!(!err.is_retryable());
    }

    #[test]
    fn unique_violation_becomes_conflict() {
        let err = WorkflowError::from(DatabaseError::Constraint(
            "insert letter: UNIQUE constraint failed: letters.in_reply_to".into(),
        ));
        assert_eq!(err.kind(), "conflict");
        assert!(err.to_string().contains("letters.in_reply_to"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn query_failures_stay_storage_errors() {
        let err = WorkflowError::from(DatabaseError::Query("disk I/O error".into()));
        assert_eq!(err.kind(), "storage");
        assert!(!err.is_retryable());
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = WorkflowError::InvalidTransition {
            from: LetterStatus::Archived,
            to: LetterStatus::Draft,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition from archived to draft"
        );
    }
}
