use thiserror::Error;

/// Stage-level failure taxonomy for the ingestion pipeline.
///
/// The orchestrator only distinguishes retryable from terminal errors;
/// everything except `NoContent` shares one uniform retry policy per
/// job kind.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    #[error("document produced no chunks")]
    NoContent,

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("vector store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether the orchestrator may re-attempt a job that failed with
    /// this error. An empty document will chunk to nothing on every
    /// attempt, so `NoContent` is terminal on the first one.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::NoContent)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
