pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::operations::handlers as operations;
use crate::sequences::handlers as sequences;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Sequences API
        .route(
            "/api/v1/sequences",
            post(sequences::handle_generate_sequence),
        )
        // Operations API
        .route(
            "/api/v1/users/:user_id/operations",
            get(operations::handle_user_operations),
        )
        .route(
            "/api/v1/operations/:id",
            get(operations::handle_get_operation),
        )
        .route(
            "/api/v1/operations/:id/cancel",
            post(operations::handle_cancel_operation),
        )
        .with_state(state)
}
