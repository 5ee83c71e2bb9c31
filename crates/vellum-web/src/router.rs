//! Axum router — maps all URL paths to handlers.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::ingest::{delete_document, ingest_file, ingest_url, task_status};
use crate::handlers::search::search;
use crate::handlers::system::{health, root};
use crate::state::SharedState;

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Build and return the full Axum router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/ingest/url", post(ingest_url))
        .route("/api/v1/ingest/file", post(ingest_file))
        .route("/api/v1/task/{task_id}", get(task_status))
        .route("/api/v1/document", delete(delete_document))
        .route("/api/v1/search", post(search))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
