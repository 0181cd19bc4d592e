//! Shared error enums for the engine.
//!
//! Each component gets its own flat `thiserror` enum, the same texture as the
//! rest of this workspace. All of them ultimately express the error kinds
//! from spec.md §7: NotFound, InvalidState, ValidationError,
//! TransientProviderError, CacheError, and concurrency no-ops (which are not
//! errors at all -- see `engine_core::runtime::Advance::NoOp`).

use thiserror::Error;

/// Malformed config or a missing required field at a mutation boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Errors from repository operations, implemented concretely by
/// `engine-infra`. Kept independent of any particular backend's error type
/// so this crate (and `engine-core`) never need to depend on `sqlx`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors surfaced by the Workflow Runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("execution exceeded the maximum of {max} step executions")]
    RunawayGuard { max: u32 },
}

/// Errors surfaced by the Job Queue Adapter.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("job dead-lettered after {attempts} attempts: {reason}")]
    DeadLettered { attempts: u32, reason: String },
}

/// Errors surfaced by CONDITION step evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unsupported operator for field type")]
    UnsupportedOperator,

    #[error("value type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },
}

/// Errors surfaced by outbound WEBHOOK calls.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("transient provider error: {0}")]
    TransientProviderError(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::new("DELAY step requires amount > 0");
        assert_eq!(err.to_string(), "DELAY step requires amount > 0");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Conflict("execution already running".to_string());
        assert_eq!(err.to_string(), "conflict: execution already running");
    }

    #[test]
    fn test_runtime_error_wraps_repository_error() {
        let err: RuntimeError = RepositoryError::NotFound.into();
        assert!(matches!(err, RuntimeError::Repository(_)));
    }

    #[test]
    fn test_queue_error_dead_lettered_display() {
        let err = QueueError::DeadLettered { attempts: 5, reason: "timeout".to_string() };
        assert_eq!(err.to_string(), "job dead-lettered after 5 attempts: timeout");
    }
}
