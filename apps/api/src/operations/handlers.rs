//! Axum route handlers for operation bookkeeping. Read-only views plus cancel.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::operations::{Operation, OperationStatus};
use crate::resilience::GenerationError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserOperationsResponse {
    pub user_id: String,
    pub active: usize,
    pub operations: Vec<Operation>,
}

/// GET /api/v1/users/:user_id/operations
pub async fn handle_user_operations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<UserOperationsResponse> {
    Json(UserOperationsResponse {
        active: state.operations.active_count(&user_id),
        operations: state.operations.get_user_operations(&user_id),
        user_id,
    })
}

/// GET /api/v1/operations/:id
pub async fn handle_get_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<Operation>, AppError> {
    let operation = state
        .operations
        .get_operation(&operation_id)
        .ok_or(GenerationError::UnknownOperation(operation_id))?;
    Ok(Json(operation))
}

/// POST /api/v1/operations/:id/cancel
///
/// Bookkeeping only: an in-flight model call keeps running and its result is
/// discarded when it returns.
pub async fn handle_cancel_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
) -> Result<Json<Operation>, AppError> {
    let cancelled = state.operations.cancel(&operation_id);
    let operation = state
        .operations
        .get_operation(&operation_id)
        .ok_or_else(|| GenerationError::UnknownOperation(operation_id.clone()))?;

    if !cancelled && operation.status != OperationStatus::Cancelled {
        return Err(AppError::Conflict(format!(
            "operation {operation_id} already finished as {:?}",
            operation.status
        )));
    }
    Ok(Json(operation))
}
