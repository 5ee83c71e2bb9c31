//! Data models for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a job's source identifier points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    File,
}

/// Canonical intermediate form produced by conversion.
/// Lives in memory for the duration of one job attempt only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub text: String,
    pub page_count: Option<u32>,
    pub title: Option<String>,
}

impl Document {
    /// Structural metadata carried onto every chunk of this document.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut meta = Map::new();
        if let Some(pages) = self.page_count {
            meta.insert("num_pages".to_string(), Value::from(pages));
        }
        if let Some(ref title) = self.title {
            meta.insert("title".to_string(), Value::from(title.clone()));
        }
        meta
    }
}

/// A bounded span of document text destined for embedding and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Zero-based, contiguous per source within one processing run.
    pub chunk_index: usize,
    pub source: String,
    /// Chunk-local metadata; wins over job metadata on key collision.
    pub metadata: Map<String, Value>,
    /// Attached after the embed stage; absent before it.
    pub embedding: Option<Vec<f32>>,
}
