use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::resilience::GenerationError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Generation(e) => generation_response(e),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// User-visible conditions ("try again shortly") are kept distinct from
/// upstream failures, which never leak raw model output.
fn generation_response(e: &GenerationError) -> (StatusCode, &'static str, String) {
    match e {
        GenerationError::ConcurrencyLimit { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "CONCURRENCY_LIMIT",
            e.to_string(),
        ),
        GenerationError::OperationConflict { .. } => {
            (StatusCode::CONFLICT, "OPERATION_CONFLICT", e.to_string())
        }
        GenerationError::Cancelled(_) => (StatusCode::CONFLICT, "CANCELLED", e.to_string()),
        GenerationError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "TIMEOUT",
            format!("{e}; try again shortly"),
        ),
        GenerationError::UnknownOperation(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", e.to_string()),
        GenerationError::InsufficientContext(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "INSUFFICIENT_CONTEXT",
            e.to_string(),
        ),
        GenerationError::Recovery(_) | GenerationError::Validation(_) => {
            tracing::error!("Model output rejected: {e}");
            (
                StatusCode::BAD_GATEWAY,
                "INVALID_MODEL_OUTPUT",
                "The AI service returned output that could not be used".to_string(),
            )
        }
        GenerationError::Rejected(_) => {
            tracing::error!("LLM request rejected: {e}");
            (
                StatusCode::BAD_GATEWAY,
                "LLM_REJECTED",
                "The AI service rejected the request".to_string(),
            )
        }
        GenerationError::Transport(_)
        | GenerationError::RateLimited(_)
        | GenerationError::ContentShape(_) => {
            tracing::error!("LLM unavailable: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "LLM_UNAVAILABLE",
                "The AI service is unavailable; try again shortly".to_string(),
            )
        }
        GenerationError::Internal(inner) => {
            tracing::error!("Internal generation error: {inner:?}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
            )
        }
    }
}
