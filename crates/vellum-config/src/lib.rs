//! Configuration loading for Vellum.
//! Reads vellum.toml from the current directory or the path in the
//! VELLUM_CONFIG env var; every field has a default so a missing file
//! yields a fully usable local-development configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String { "0.0.0.0".to_string() }
fn default_api_port() -> u16 { 8000 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self { host: default_api_host(), port: default_api_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Must match the embedding model's output dimension. Checked at
    /// collection initialization, not per write.
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
}

fn default_qdrant_url()  -> String { "http://localhost:6333".to_string() }
fn default_collection()  -> String { "documents".to_string() }
fn default_vector_dim()  -> usize  { 384 }

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            vector_dim: default_vector_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default = "default_converter_url")]
    pub url: String,
    /// Request OCR for scanned pages.
    #[serde(default = "bool_true")]
    pub ocr: bool,
    /// Request table-structure extraction.
    #[serde(default = "bool_true")]
    pub table_structure: bool,
}

fn default_converter_url() -> String { "http://localhost:8003".to_string() }
fn bool_true() -> bool { true }

impl Default for ConverterConfig {
    fn default() -> Self {
        Self { url: default_converter_url(), ocr: true, table_structure: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// "local" (service /embed endpoint) or "openai-compatible" (/v1/embeddings).
    #[serde(default = "default_embed_backend")]
    pub backend: String,
    #[serde(default = "default_embed_url")]
    pub base_url: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_vector_dim")]
    pub dim: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub api_key: Option<String>,
}

fn default_embed_backend() -> String { "local".to_string() }
fn default_embed_url()     -> String { "http://localhost:8002".to_string() }
fn default_embed_model()   -> String { "sentence-transformers/all-MiniLM-L6-v2".to_string() }
fn default_batch_size()    -> usize  { 32 }

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend:    default_embed_backend(),
            base_url:   default_embed_url(),
            model:      default_embed_model(),
            dim:        default_vector_dim(),
            batch_size: default_batch_size(),
            api_key:    None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker tasks per process. 0 disables in-process workers (API-only
    /// process; run the dedicated `worker` bin instead).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Jobs handled per worker generation before the loop restarts.
    #[serde(default = "default_max_jobs_per_worker")]
    pub max_jobs_per_worker: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_soft_limit_secs")]
    pub soft_time_limit_secs: u64,
    #[serde(default = "default_hard_limit_secs")]
    pub hard_time_limit_secs: u64,
    #[serde(default = "default_ingest_retries")]
    pub ingest_max_retries: u32,
    #[serde(default = "default_ingest_base_delay_secs")]
    pub ingest_base_delay_secs: u64,
    #[serde(default = "default_delete_retries")]
    pub delete_max_retries: u32,
    #[serde(default = "default_delete_delay_secs")]
    pub delete_delay_secs: u64,
    /// Terminal jobs older than this are purged from the job store.
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
}

fn default_workers()                -> usize { 2 }
fn default_max_jobs_per_worker()    -> usize { 50 }
fn default_poll_interval_ms()       -> u64   { 500 }
fn default_soft_limit_secs()        -> u64   { 1_500 }  // 25 minutes
fn default_hard_limit_secs()        -> u64   { 1_800 }  // 30 minutes
fn default_ingest_retries()         -> u32   { 3 }
fn default_ingest_base_delay_secs() -> u64   { 60 }
fn default_delete_retries()         -> u32   { 2 }
fn default_delete_delay_secs()      -> u64   { 30 }
fn default_job_ttl_secs()           -> u64   { 86_400 } // 24 hours

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers:                default_workers(),
            max_jobs_per_worker:    default_max_jobs_per_worker(),
            poll_interval_ms:       default_poll_interval_ms(),
            soft_time_limit_secs:   default_soft_limit_secs(),
            hard_time_limit_secs:   default_hard_limit_secs(),
            ingest_max_retries:     default_ingest_retries(),
            ingest_base_delay_secs: default_ingest_base_delay_secs(),
            delete_max_retries:     default_delete_retries(),
            delete_delay_secs:      default_delete_delay_secs(),
            job_ttl_secs:           default_job_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Shared directory where the API process drops uploads for workers.
    /// The resolver's cleanup guard only deletes files under this root.
    #[serde(default = "default_shared_temp_dir")]
    pub shared_temp_dir: String,
    /// Directory holding the LMDB job store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_shared_temp_dir() -> String { "/tmp/vellum-uploads".to_string() }
fn default_data_dir()        -> String { "./data".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            shared_temp_dir: default_shared_temp_dir(),
            data_dir:        default_data_dir(),
        }
    }
}

impl Settings {
    /// Load configuration from vellum.toml.
    /// Checks VELLUM_CONFIG env var first, then the current directory;
    /// a missing file yields `Settings::default()`.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = std::env::var("VELLUM_CONFIG")
            .unwrap_or_else(|_| "vellum.toml".to_string());

        let mut settings = if Path::new(&path).exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            Settings::default()
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Deployment URLs are commonly set per-environment rather than in
    /// the checked-in TOML file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("CONVERTER_URL") {
            self.converter.url = v;
        }
        if let Ok(v) = std::env::var("EMBEDDER_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("SHARED_TEMP_DIR") {
            self.storage.shared_temp_dir = v;
        }
        if let Ok(v) = std::env::var("VELLUM_DATA_DIR") {
            self.storage.data_dir = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let s = Settings::default();
        assert_eq!(s.qdrant.vector_dim, 384);
        assert_eq!(s.embedding.dim, 384);
        assert_eq!(s.embedding.batch_size, 32);
        assert_eq!(s.worker.ingest_max_retries, 3);
        assert_eq!(s.worker.hard_time_limit_secs, 1_800);
        assert_eq!(s.api.port, 8000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let s: Settings = toml::from_str(
            r#"
            [qdrant]
            collection = "papers"

            [worker]
            workers = 4
            "#,
        )
        .unwrap();
        assert_eq!(s.qdrant.collection, "papers");
        assert_eq!(s.qdrant.url, "http://localhost:6333");
        assert_eq!(s.worker.workers, 4);
        assert_eq!(s.worker.max_jobs_per_worker, 50);
    }
}
