use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

// REST API for the natural-language query pipeline
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Question -> statement -> execution
            .route("/query", post(handlers::ask_query))
            // History
            .route("/queries", get(handlers::query_history))
            .route(
                "/query/{id}",
                get(handlers::query_detail).delete(handlers::delete_query),
            )
            .route("/query/{id}/rerun", post(handlers::rerun_query))
            // Analysis artifacts
            .route("/query/{id}/chart", post(handlers::generate_chart))
            .route("/query/{id}/insight", post(handlers::generate_insight))
            // System status
            .route("/status", get(handlers::system_status)),
    )
}
