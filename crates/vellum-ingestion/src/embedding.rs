//! Embedding client — batches chunk text through the external embedding
//! service, producing fixed-dimension vectors.
//!
//! Supported backends:
//!   - LocalService     (dedicated embed service, `{base}/embed`)
//!   - OpenAiCompatible (any `/v1/embeddings` endpoint)
//!
//! Construct the client once per worker and inject it into every job;
//! the service holds the model, so there is no per-job load cost here.

use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use vellum_common::PipelineError;
use vellum_config::EmbeddingSettings;

const EMBED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    LocalService,
    OpenAiCompatible,
}

#[derive(Debug)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
    base_url: String,
    model: String,
    dim: usize,
    batch_size: usize,
    api_key: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct LocalEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(cfg: &EmbeddingSettings) -> Result<Self, PipelineError> {
        let backend = match cfg.backend.as_str() {
            "local" => EmbeddingBackend::LocalService,
            "openai-compatible" => EmbeddingBackend::OpenAiCompatible,
            other => {
                return Err(PipelineError::Config(format!(
                    "unknown embedding backend: {other}"
                )))
            }
        };
        Ok(Self {
            backend,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            dim: cfg.dim,
            batch_size: cfg.batch_size.max(1),
            api_key: cfg.api_key.clone(),
            client: Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
        })
    }

    /// Output dimension the vector store must be configured with.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed texts one-to-one, order-preserving. Inputs are sliced into
    /// internal batches; callers see a single call.
    #[instrument(skip(self, texts), fields(n = texts.len(), backend = ?self.backend))]
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut out = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.batch_size) {
            let vectors = match self.backend {
                EmbeddingBackend::LocalService => self.embed_local(slice).await?,
                EmbeddingBackend::OpenAiCompatible => self.embed_openai(slice).await?,
            };
            if vectors.len() != slice.len() {
                return Err(PipelineError::EmbeddingFailed(format!(
                    "expected {} vectors, got {}",
                    slice.len(),
                    vectors.len()
                )));
            }
            for v in &vectors {
                if v.len() != self.dim {
                    return Err(PipelineError::EmbeddingFailed(format!(
                        "expected dimension {}, got {}",
                        self.dim,
                        v.len()
                    )));
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    /// Embed a single query in the same vector space as stored documents.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vectors = self.embed_batch(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| PipelineError::EmbeddingFailed("empty response for query".to_string()))
    }

    async fn embed_local(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let url = format!("{}/embed", self.base_url);
        let body = serde_json::json!({
            "texts":     texts,
            "normalize": true,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::EmbeddingFailed(format!("embedder unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::EmbeddingFailed(e.to_string()))?;
        let parsed: LocalEmbedResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::EmbeddingFailed(format!("bad embedder response: {e}")))?;
        Ok(parsed.embeddings)
    }

    async fn embed_openai(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": &self.model,
            "input": texts,
        });
        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| PipelineError::EmbeddingFailed(format!("embedder unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::EmbeddingFailed(e.to_string()))?;
        let parsed: OpenAiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| PipelineError::EmbeddingFailed(format!("bad embedder response: {e}")))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> EmbeddingSettings {
        EmbeddingSettings {
            backend: backend.to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let err = EmbeddingClient::new(&settings("cuneiform")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn empty_input_short_circuits() {
        let client = EmbeddingClient::new(&settings("local")).unwrap();
        let out = client.embed_batch(&[]).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_embedding_failed() {
        let client = EmbeddingClient::new(&settings("local")).unwrap();
        let err = client
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmbeddingFailed(_)));
    }
}
