//! vellum-web — HTTP front door for the ingestion pipeline.
//!
//! Handlers are thin: validate input, enqueue a job or pass a query
//! through, and report job status. All processing happens in the
//! workers behind the job store.

pub mod error;
pub mod handlers;
pub mod router;
pub mod state;
