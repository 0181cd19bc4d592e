//! Application error type mapping to HTTP status codes and envelope format.
//!
//! Reuses [`ApiResponse`]'s envelope rather than hand-rolling a response
//! body, per spec.md §7's error kind table: `NotFound -> 404`,
//! `InvalidState -> 409`, `ValidationError -> 400`, `TransientProviderError
//! -> 502`. `CacheError` has no HTTP mapping -- a cache miss or write
//! failure degrades silently to a cold path and never reaches this layer.

use axum::response::{IntoResponse, Response};
use engine_types::error::{QueueError, RepositoryError, RuntimeError, WebhookError};
use uuid::Uuid;

use crate::http::response::ApiResponse;

/// Application-level error that maps to an [`ApiResponse`] error envelope.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    InvalidState(String),
    Validation(String),
    TransientProviderError(String),
    Internal(String),
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(msg) => ApiError::NotFound(msg),
            RuntimeError::InvalidState(msg) => ApiError::InvalidState(msg),
            RuntimeError::Validation(v) => ApiError::Validation(v.to_string()),
            RuntimeError::Repository(r) => r.into(),
            RuntimeError::RunawayGuard { max } => {
                ApiError::InvalidState(format!("execution exceeded the maximum of {max} step executions"))
            }
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound => ApiError::NotFound("entity not found".to_string()),
            RepositoryError::Conflict(msg) => ApiError::InvalidState(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(msg) => ApiError::NotFound(msg),
            QueueError::Repository(r) => r.into(),
            QueueError::DeadLettered { attempts, reason } => {
                ApiError::InvalidState(format!("job dead-lettered after {attempts} attempts: {reason}"))
            }
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::TransientProviderError(msg) => ApiError::TransientProviderError(msg),
            WebhookError::Timeout(secs) => {
                ApiError::TransientProviderError(format!("request timed out after {secs}s"))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::NotFound(msg) => ("NOT_FOUND", msg),
            ApiError::InvalidState(msg) => ("INVALID_STATE", msg),
            ApiError::Validation(msg) => ("VALIDATION_ERROR", msg),
            ApiError::TransientProviderError(msg) => ("TRANSIENT_PROVIDER_ERROR", msg),
            ApiError::Internal(msg) => ("INTERNAL_ERROR", msg),
        };
        ApiResponse::<()>::error(code, &message, Uuid::now_v7().to_string(), 0).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_runtime_error_maps_to_not_found_code() {
        let err: ApiError = RuntimeError::NotFound("workflow abc".to_string()).into();
        assert!(matches!(err, ApiError::NotFound(msg) if msg == "workflow abc"));
    }

    #[test]
    fn runaway_guard_maps_to_invalid_state() {
        let err: ApiError = RuntimeError::RunawayGuard { max: 10_000 }.into();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }

    #[test]
    fn webhook_timeout_maps_to_transient_provider_error() {
        let err: ApiError = WebhookError::Timeout(30).into();
        assert!(matches!(err, ApiError::TransientProviderError(_)));
    }
}
