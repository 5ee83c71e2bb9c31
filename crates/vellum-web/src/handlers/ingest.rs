//! Ingestion endpoints: submit sources, poll status, delete documents.
//!
//! These handlers only validate and enqueue; the response is always a
//! task ID the caller polls via `GET /api/v1/task/{task_id}`.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use url::Url;

use vellum_ingestion::jobs::{Job, JobKind};
use vellum_ingestion::models::SourceKind;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct IngestUrlRequest {
    pub url: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub task_id: String,
    pub status: &'static str,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub kind: &'static str,
    pub state: &'static str,
    pub source: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub source: String,
}

/// POST /api/v1/ingest/url — enqueue ingestion of a remote document.
pub async fn ingest_url(
    State(state): State<SharedState>,
    Json(req): Json<IngestUrlRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let parsed = Url::parse(&req.url)
        .map_err(|e| ApiError::BadRequest(format!("invalid url: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(format!(
            "unsupported url scheme: {}",
            parsed.scheme()
        )));
    }

    let job = Job::new_ingest(
        req.url.clone(),
        SourceKind::Url,
        req.metadata,
        state.settings.worker.ingest_max_retries,
    );
    state.jobs.enqueue(&job).map_err(anyhow::Error::from)?;
    info!(task_id = %job.job_id, url = %req.url, "url ingestion enqueued");

    Ok((StatusCode::ACCEPTED, Json(accepted(&job))))
}

/// POST /api/v1/ingest/file — upload a document and enqueue ingestion.
///
/// The upload lands in the shared temp directory under a unique name;
/// the worker's cleanup guard removes it once the job's final attempt
/// finishes, whatever the outcome.
pub async fn ingest_file(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut metadata = Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("bad multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(sanitize_filename)
                    .unwrap_or_else(|| "document.pdf".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed reading upload: {e}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            Some("metadata") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed reading metadata: {e}")))?;
                metadata = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("metadata is not a JSON object: {e}")))?;
            }
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(ApiError::BadRequest("missing `file` field".to_string()));
    };
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
    }

    // Unique name so concurrent uploads of the same file never collide.
    let stored_name = format!("{}_{filename}", Utc::now().timestamp_millis());
    let path = std::path::Path::new(&state.settings.storage.shared_temp_dir).join(&stored_name);
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(anyhow::Error::from)?;

    metadata.insert("filename".to_string(), Value::from(filename.clone()));

    let job = Job::new_ingest(
        path.to_string_lossy().to_string(),
        SourceKind::File,
        metadata,
        state.settings.worker.ingest_max_retries,
    );
    if let Err(e) = state.jobs.enqueue(&job) {
        // Orphaned upload if the enqueue fails; remove it here since no
        // worker will ever claim it.
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ApiError::Internal(e.into()));
    }
    info!(task_id = %job.job_id, file = %filename, bytes = bytes.len(), "file ingestion enqueued");

    Ok((StatusCode::ACCEPTED, Json(accepted(&job))))
}

/// GET /api/v1/task/{task_id} — job status lookup.
pub async fn task_status(
    State(state): State<SharedState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let job = state
        .jobs
        .get(&task_id)
        .map_err(anyhow::Error::from)?
        .ok_or_else(|| ApiError::NotFound(format!("no task with id {task_id}")))?;

    Ok(Json(TaskStatusResponse {
        task_id: job.job_id,
        kind: match job.kind {
            JobKind::Ingest => "ingest",
            JobKind::Delete => "delete",
        },
        state: job.state.as_str(),
        source: job.source,
        attempts: job.attempts,
        chunk_count: job.chunk_count,
        error: job.last_error,
        created_at: rfc3339(job.created_at_ms),
        updated_at: rfc3339(job.updated_at_ms),
    }))
}

/// DELETE /api/v1/document — enqueue removal of all points for a source.
pub async fn delete_document(
    State(state): State<SharedState>,
    Query(params): Query<DeleteParams>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    if params.source.trim().is_empty() {
        return Err(ApiError::BadRequest("source must not be empty".to_string()));
    }

    let job = Job::new_delete(params.source.clone(), state.settings.worker.delete_max_retries);
    state.jobs.enqueue(&job).map_err(anyhow::Error::from)?;
    info!(task_id = %job.job_id, source = %params.source, "document deletion enqueued");

    Ok((StatusCode::ACCEPTED, Json(accepted(&job))))
}

fn accepted(job: &Job) -> JobAccepted {
    JobAccepted {
        task_id: job.job_id.clone(),
        status: "pending",
        source: job.source.clone(),
    }
}

fn rfc3339(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .unwrap_or_default()
        .to_rfc3339()
}

/// Keep only the final path component and drop characters that could
/// escape the shared directory.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    if cleaned.is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned
    }
}
