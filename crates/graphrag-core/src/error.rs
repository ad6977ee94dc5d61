use thiserror::Error;

/// Crate-wide error type. Variants name failure *kinds*, not wrapped
/// libraries — callers match on kind, not on the underlying cause.
#[derive(Debug, Error)]
pub enum GraphRagError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage query failed: {0}")]
    StorageQueryFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("LLM call failed: {0}")]
    LLMFailed(String),

    #[error("failed to parse LLM output as JSON: {0}")]
    LLMParseFailed(String),

    #[error("chunking failed: {0}")]
    ChunkingFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("retrieval exhausted with no results")]
    Empty,

    #[error("validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, GraphRagError>;
