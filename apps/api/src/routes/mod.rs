pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::prediction::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/users/:user_id/predictions/upcoming",
            get(handlers::handle_upcoming),
        )
        .route(
            "/api/v1/users/:user_id/predictions/events",
            get(handlers::handle_user_events),
        )
        .route(
            "/api/v1/jobs/:job_id/interviews/:interview_id/prediction",
            get(handlers::handle_get_prediction),
        )
        .route(
            "/api/v1/jobs/:job_id/interviews/:interview_id/prediction/recalculate",
            post(handlers::handle_recalculate),
        )
        .route(
            "/api/v1/jobs/:job_id/interviews/:interview_id/prediction/events",
            get(handlers::handle_interview_events),
        )
        .route(
            "/api/v1/jobs/:job_id/interviews/:interview_id/stale",
            post(handlers::handle_notify_stale),
        )
        .route(
            "/api/v1/jobs/:job_id/interviews/:interview_id/timing",
            get(handlers::handle_timing),
        )
        .route(
            "/api/v1/predictions/:prediction_id/recommendations/:index/complete",
            post(handlers::handle_complete_recommendation),
        )
        .with_state(state)
}
