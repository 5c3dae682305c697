//! Axum route handlers for the Sequences API.

use axum::{extract::State, Json};

use crate::errors::AppError;
use crate::sequences::{SequenceDraft, SequenceRequest};
use crate::state::AppState;

/// POST /api/v1/sequences
///
/// Drafts a five-email sequence from the owner's business data and optional
/// interview transcripts. Contamination findings ride along in the response.
pub async fn handle_generate_sequence(
    State(state): State<AppState>,
    Json(request): Json<SequenceRequest>,
) -> Result<Json<SequenceDraft>, AppError> {
    if request.user_id.trim().is_empty() {
        return Err(AppError::Validation("user_id cannot be empty".to_string()));
    }
    if request.business.values().all(|v| v.trim().is_empty()) {
        return Err(AppError::Validation(
            "business must contain at least one non-empty field".to_string(),
        ));
    }

    let draft = state.sequences.generate(request).await?;

    Ok(Json(draft))
}
