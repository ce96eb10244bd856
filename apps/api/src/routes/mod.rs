pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::diagnosis::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/diagnosis/attempts",
            post(handlers::handle_create_attempt),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id",
            get(handlers::handle_get_attempt).delete(handlers::handle_close_attempt),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/type",
            post(handlers::handle_select_type),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/answers",
            post(handlers::handle_answer),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/back",
            post(handlers::handle_back),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/refresh",
            post(handlers::handle_refresh),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/results/retry",
            post(handlers::handle_retry_results),
        )
        .route(
            "/api/v1/diagnosis/attempts/:id/reset",
            post(handlers::handle_reset),
        )
        .route(
            "/api/v1/diagnosis/sessions/:session_id/result",
            get(handlers::handle_get_session_result),
        )
        .with_state(state)
}
