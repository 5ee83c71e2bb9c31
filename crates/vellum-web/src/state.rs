//! Shared application state for the web server.

use std::path::Path;
use std::sync::Arc;

use vellum_config::Settings;
use vellum_ingestion::convert::ConverterClient;
use vellum_ingestion::embedding::EmbeddingClient;
use vellum_ingestion::jobs::JobStore;
use vellum_ingestion::store::VectorStore;

/// Shared state injected into every Axum handler.
pub struct AppState {
    pub settings: Settings,
    pub jobs: Arc<JobStore>,
    pub embedder: Arc<EmbeddingClient>,
    pub store: Arc<VectorStore>,
    pub converter: Arc<ConverterClient>,
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        if settings.embedding.dim != settings.qdrant.vector_dim {
            anyhow::bail!(
                "embedding dimension {} does not match collection dimension {}",
                settings.embedding.dim,
                settings.qdrant.vector_dim
            );
        }
        std::fs::create_dir_all(&settings.storage.shared_temp_dir)?;
        let jobs = Arc::new(JobStore::open(Path::new(&settings.storage.data_dir))?);
        let embedder = Arc::new(EmbeddingClient::new(&settings.embedding)?);
        let store = Arc::new(VectorStore::new(&settings.qdrant));
        let converter = Arc::new(ConverterClient::new(&settings.converter));
        Ok(Self {
            settings,
            jobs,
            embedder,
            store,
            converter,
        })
    }
}

pub type SharedState = Arc<AppState>;
