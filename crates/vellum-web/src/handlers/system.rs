//! Service identity and dependency health.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use vellum_ingestion::jobs::JobState;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub qdrant: bool,
    pub converter: bool,
    pub queue: QueueCounts,
}

#[derive(Debug, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
}

/// GET / — service identity.
pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "vellum",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health — reachability of the external dependencies plus queue
/// depth. Degraded dependencies report 200 with `status: "degraded"`;
/// this endpoint is for operators, not load balancers.
pub async fn health(State(state): State<SharedState>) -> Result<Json<HealthResponse>, ApiError> {
    let (qdrant, converter) = tokio::join!(state.store.health_check(), state.converter.health_check());
    let qdrant = qdrant.unwrap_or(false);
    let converter = converter.unwrap_or(false);

    let queue = QueueCounts {
        pending: state
            .jobs
            .count_by_state(JobState::Pending)
            .map_err(anyhow::Error::from)?,
        running: state
            .jobs
            .count_by_state(JobState::Running)
            .map_err(anyhow::Error::from)?,
    };

    Ok(Json(HealthResponse {
        status: if qdrant && converter { "ok" } else { "degraded" },
        qdrant,
        converter,
        queue,
    }))
}
