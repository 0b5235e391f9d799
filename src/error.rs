//! Error types for the expense dispatch + retrieval core

use thiserror::Error;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Embedding capability unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Retrieval failure: {0}")]
    RetrievalFailure(String),

    #[error("Reasoning model failure: {0}")]
    ReasoningModelFailure(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
