//! Semantic search pass-through: embed the query, search the
//! collection, return payload-backed hits.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use vellum_ingestion::store::SearchHit;

use crate::error::ApiError;
use crate::state::SharedState;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub score_threshold: Option<f32>,
    /// Restrict hits to a single ingested source.
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchHit>,
    pub total: usize,
}

/// POST /api/v1/search
pub async fn search(
    State(state): State<SharedState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let limit = req.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let vector = state
        .embedder
        .embed_query(&req.query)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    let filter = req.source.as_ref().map(|source| {
        json!({
            "must": [
                { "key": "source", "match": { "value": source } }
            ]
        })
    });

    let results = state
        .store
        .search(&vector, limit, req.score_threshold, filter)
        .await?;
    let total = results.len();

    Ok(Json(SearchResponse {
        query: req.query,
        results,
        total,
    }))
}
