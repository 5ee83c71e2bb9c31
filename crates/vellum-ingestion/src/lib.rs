//! vellum-ingestion — Asynchronous document ingestion pipeline.
//! - Source resolution (URL download / shared-dir upload) with guarded cleanup
//! - Document conversion via the external converter service
//! - Hybrid chunking under a token budget
//! - Batched embedding via the external embedder service
//! - Idempotent upsert into the Qdrant collection
//! - Durable job queue + worker pool with bounded retries

pub mod chunker;
pub mod convert;
pub mod embedding;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod worker;
