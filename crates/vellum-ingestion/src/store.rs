//! Qdrant vector store writer — deterministic point identity, idempotent
//! batched upserts, filtered deletes, and the query-path search
//! pass-through.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

use vellum_common::PipelineError;
use vellum_config::QdrantConfig;

use crate::models::Chunk;

const STORE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Deterministic point identity: the first 16 hex digits of
/// SHA-256("{source}_{chunk_index}") as an unsigned integer (the first
/// 8 digest bytes, big-endian). Re-upserting the same (source, index)
/// always lands on the same point, which is what makes re-ingestion
/// idempotent.
pub fn point_id(source: &str, chunk_index: usize) -> u64 {
    let digest = Sha256::digest(format!("{source}_{chunk_index}").as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest shorter than 8 bytes"))
}

/// Payload values are restricted to primitive/serializable shapes:
/// scalars, lists of scalars, and flat maps of scalars. Anything else
/// is silently dropped, not errored.
fn is_primitive(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_scalar),
        Value::Object(map) => map.values().all(is_scalar),
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Build a point payload. Base fields first, then job metadata, then
/// chunk metadata — last write wins, so chunk-level keys shadow
/// job-level ones.
pub fn build_payload(
    chunk: &Chunk,
    source: &str,
    job_metadata: &Map<String, Value>,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".to_string(), Value::from(chunk.text.clone()));
    payload.insert("source".to_string(), Value::from(source.to_string()));
    payload.insert("chunk_index".to_string(), Value::from(chunk.chunk_index));

    for (k, v) in job_metadata {
        if is_primitive(v) {
            payload.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in &chunk.metadata {
        if is_primitive(v) {
            payload.insert(k.clone(), v.clone());
        }
    }
    payload
}

/// One search hit from the collection.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub source: String,
    pub score: f32,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

/// Client for one named Qdrant collection.
#[derive(Debug)]
pub struct VectorStore {
    base_url: String,
    collection: String,
    dim: usize,
    client: Client,
}

impl VectorStore {
    pub fn new(cfg: &QdrantConfig) -> Self {
        Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            collection: cfg.collection.clone(),
            dim: cfg.vector_dim,
            client: Client::builder()
                .timeout(STORE_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Check if the store is reachable.
    pub async fn health_check(&self) -> anyhow::Result<bool> {
        let resp = self
            .client
            .get(format!("{}/collections", self.base_url))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Idempotent collection initialization: create with the configured
    /// dimension and cosine distance only if absent. A dimension
    /// mismatch with an existing collection is a configuration error
    /// caught here at startup, never at write time.
    pub async fn ensure_collection(&self) -> Result<(), PipelineError> {
        let resp = self
            .client
            .get(self.collection_url())
            .send()
            .await
            .map_err(|e| PipelineError::StoreWriteFailed(format!("qdrant unreachable: {e}")))?;

        match resp.status() {
            StatusCode::OK => {
                let info: CollectionInfoResponse = resp.json().await.map_err(|e| {
                    PipelineError::StoreWriteFailed(format!("bad collection info: {e}"))
                })?;
                let existing = info.result.config.params.vectors.size;
                if existing != self.dim {
                    return Err(PipelineError::Config(format!(
                        "collection '{}' has dimension {existing}, expected {}",
                        self.collection, self.dim
                    )));
                }
                info!(collection = %self.collection, "collection already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let body = json!({
                    "vectors": { "size": self.dim, "distance": "Cosine" }
                });
                let resp = self
                    .client
                    .put(self.collection_url())
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| {
                        PipelineError::StoreWriteFailed(format!("create collection: {e}"))
                    })?;
                if !resp.status().is_success() {
                    return Err(PipelineError::StoreWriteFailed(format!(
                        "create collection returned {}",
                        resp.status()
                    )));
                }
                info!(collection = %self.collection, dim = self.dim, "collection created");
                Ok(())
            }
            status => Err(PipelineError::StoreWriteFailed(format!(
                "collection lookup returned {status}"
            ))),
        }
    }

    /// Single batched upsert with wait-for-completion semantics. Either
    /// the whole batch lands or the attempt fails; there is no partial
    /// success from the orchestrator's point of view.
    #[instrument(skip(self, chunks, job_metadata), fields(n = chunks.len(), source))]
    pub async fn upsert_chunks(
        &self,
        chunks: &[Chunk],
        source: &str,
        job_metadata: &Map<String, Value>,
    ) -> Result<(), PipelineError> {
        let mut points = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let vector = chunk.embedding.as_ref().ok_or_else(|| {
                PipelineError::StoreWriteFailed(format!(
                    "chunk {} has no embedding",
                    chunk.chunk_index
                ))
            })?;
            points.push(json!({
                "id": point_id(source, chunk.chunk_index),
                "vector": vector,
                "payload": build_payload(chunk, source, job_metadata),
            }));
        }

        let resp = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(|e| PipelineError::StoreWriteFailed(format!("upsert: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(PipelineError::StoreWriteFailed(format!(
                "upsert returned {status}: {detail}"
            )));
        }

        info!(n = chunks.len(), source, "chunks upserted");
        Ok(())
    }

    /// Remove points of this source with `chunk_index >= from_index`.
    /// Run after a successful upsert so a re-ingest that produced fewer
    /// chunks does not leave orphaned high-index points behind.
    pub async fn prune_stale(&self, source: &str, from_index: usize) -> Result<(), PipelineError> {
        let filter = json!({
            "must": [
                { "key": "source", "match": { "value": source } },
                { "key": "chunk_index", "range": { "gte": from_index } }
            ]
        });
        self.filtered_delete(filter).await?;
        info!(source, from_index, "stale points pruned");
        Ok(())
    }

    /// Delete every point whose payload `source` equals the given value,
    /// server-side — no client-side enumeration.
    pub async fn delete_by_source(&self, source: &str) -> Result<(), PipelineError> {
        let filter = json!({
            "must": [
                { "key": "source", "match": { "value": source } }
            ]
        });
        self.filtered_delete(filter).await?;
        info!(source, "all points deleted for source");
        Ok(())
    }

    async fn filtered_delete(&self, filter: Value) -> Result<(), PipelineError> {
        let resp = self
            .client
            .post(format!("{}/points/delete?wait=true", self.collection_url()))
            .json(&json!({ "filter": filter }))
            .send()
            .await
            .map_err(|e| PipelineError::StoreWriteFailed(format!("delete: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(PipelineError::StoreWriteFailed(format!(
                "delete returned {status}: {detail}"
            )));
        }
        Ok(())
    }

    /// Similarity search over the collection. Invoked by the query
    /// path; shares the same store contract as ingestion.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<Value>,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        if let Some(f) = filter {
            body["filter"] = f;
        }

        let resp = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let parsed: SearchResponse = resp.json().await?;

        Ok(parsed
            .result
            .into_iter()
            .map(|p| {
                let mut payload = p.payload;
                let text = payload
                    .remove("text")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let source = payload
                    .remove("source")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                SearchHit {
                    text,
                    source,
                    score: p.score,
                    metadata: payload,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, meta: Map<String, Value>) -> Chunk {
        Chunk {
            text: format!("chunk {index}"),
            chunk_index: index,
            source: "doc.pdf".to_string(),
            metadata: meta,
            embedding: Some(vec![0.0; 384]),
        }
    }

    #[test]
    fn point_id_is_deterministic() {
        let a = point_id("https://example.com/a.pdf", 0);
        let b = point_id("https://example.com/a.pdf", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn point_id_varies_with_inputs() {
        let base = point_id("doc.pdf", 0);
        assert_ne!(base, point_id("doc.pdf", 1));
        assert_ne!(base, point_id("other.pdf", 0));
    }

    #[test]
    fn point_id_matches_sha256_prefix() {
        // Cross-check against the definition: first 16 hex digits of
        // SHA-256("{source}_{chunk_index}") as an integer.
        let digest = Sha256::digest(b"doc.pdf_0");
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let expected = u64::from_str_radix(&hex[..16], 16).unwrap();
        assert_eq!(point_id("doc.pdf", 0), expected);
    }

    #[test]
    fn payload_base_fields_always_present() {
        let payload = build_payload(&chunk(2, Map::new()), "doc.pdf", &Map::new());
        assert_eq!(payload.get("text").unwrap(), "chunk 2");
        assert_eq!(payload.get("source").unwrap(), "doc.pdf");
        assert_eq!(payload.get("chunk_index").unwrap(), 2);
    }

    #[test]
    fn chunk_metadata_wins_on_collision() {
        let mut job_meta = Map::new();
        job_meta.insert("page".to_string(), json!(1));
        job_meta.insert("tag".to_string(), json!("x"));

        let mut chunk_meta = Map::new();
        chunk_meta.insert("page".to_string(), json!(2));

        let payload = build_payload(&chunk(0, chunk_meta), "doc.pdf", &job_meta);
        assert_eq!(payload.get("page").unwrap(), 2);
        assert_eq!(payload.get("tag").unwrap(), "x");
    }

    #[test]
    fn non_primitive_metadata_is_dropped_silently() {
        let mut job_meta = Map::new();
        job_meta.insert("ok_list".to_string(), json!(["a", "b"]));
        job_meta.insert("ok_map".to_string(), json!({"k": 1}));
        job_meta.insert("nested_list".to_string(), json!([["a"]]));
        job_meta.insert("nested_map".to_string(), json!({"k": {"deep": true}}));

        let payload = build_payload(&chunk(0, Map::new()), "doc.pdf", &job_meta);
        assert!(payload.contains_key("ok_list"));
        assert!(payload.contains_key("ok_map"));
        assert!(!payload.contains_key("nested_list"));
        assert!(!payload.contains_key("nested_map"));
    }
}
