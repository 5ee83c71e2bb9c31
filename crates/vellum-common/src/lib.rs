//! vellum-common — Shared types and errors used across all Vellum crates.

pub mod error;

pub use error::{PipelineError, Result};
