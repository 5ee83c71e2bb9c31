//! The ingestion pipeline: resolve → convert → chunk → embed → upsert.
//!
//! One `Pipeline` value is shared by all workers in a process; every
//! stage client is connection-pooled and stateless per job. The
//! `DocumentProcessor` trait is the seam between job orchestration
//! (claiming, retrying, timeouts) and document processing proper.

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use vellum_common::PipelineError;
use vellum_config::Settings;

use crate::chunker::{chunk_document, ChunkerConfig};
use crate::convert::ConverterClient;
use crate::embedding::EmbeddingClient;
use crate::jobs::Job;
use crate::resolver::SourceResolver;
use crate::store::VectorStore;

/// What the worker loop needs from a processing backend. Implemented by
/// [`Pipeline`] for real jobs; tests substitute scripted stand-ins.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Run one ingest attempt to completion. Returns the number of
    /// chunks written.
    async fn ingest(&self, job: &Job) -> Result<u32, PipelineError>;

    /// Remove every stored point for the given source.
    async fn delete(&self, source: &str) -> Result<(), PipelineError>;
}

#[derive(Debug)]
pub struct Pipeline {
    resolver: SourceResolver,
    converter: ConverterClient,
    chunker: ChunkerConfig,
    embedder: EmbeddingClient,
    store: VectorStore,
}

impl Pipeline {
    pub fn from_settings(settings: &Settings) -> Result<Self, PipelineError> {
        let embedder = EmbeddingClient::new(&settings.embedding)?;
        // A dimension mismatch would otherwise surface as a write
        // failure on every upsert, burning the retry budget.
        if embedder.dim() != settings.qdrant.vector_dim {
            return Err(PipelineError::Config(format!(
                "embedding dimension {} does not match collection dimension {}",
                embedder.dim(),
                settings.qdrant.vector_dim
            )));
        }
        Ok(Self {
            resolver: SourceResolver::new(&settings.storage.shared_temp_dir),
            converter: ConverterClient::new(&settings.converter),
            chunker: ChunkerConfig::default(),
            embedder,
            store: VectorStore::new(&settings.qdrant),
        })
    }
}

#[async_trait]
impl DocumentProcessor for Pipeline {
    #[instrument(skip(self, job), fields(job_id = %job.job_id, source = %job.source))]
    async fn ingest(&self, job: &Job) -> Result<u32, PipelineError> {
        // The resolved source holds the cleanup guard for the whole
        // attempt; every return path below (and a drop of this future
        // by the hard timeout) releases the local file.
        let resolved = self.resolver.resolve(job.source_kind, &job.source).await?;

        let document = self.converter.convert(&resolved.path, &job.source).await?;

        let mut chunks = chunk_document(&document, &self.chunker);
        if chunks.is_empty() {
            warn!(source = %job.source, "document produced no chunks");
            return Err(PipelineError::NoContent);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        self.store
            .upsert_chunks(&chunks, &job.source, &job.metadata)
            .await?;
        // A re-ingest that shrank the document leaves stale high-index
        // points behind; drop them now that the new set is durable.
        self.store.prune_stale(&job.source, chunks.len()).await?;

        info!(
            source = %job.source,
            chunks = chunks.len(),
            pages = ?document.page_count,
            "document ingested"
        );
        Ok(chunks.len() as u32)
    }

    #[instrument(skip(self))]
    async fn delete(&self, source: &str) -> Result<(), PipelineError> {
        self.store.delete_by_source(source).await
    }
}
