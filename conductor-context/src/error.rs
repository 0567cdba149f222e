//! Error taxonomy for the vector store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("vector store circuit breaker is open; degrade to keyword-only search")]
    CircuitOpen,

    #[error("embedding dimension mismatch for collection {collection}: expected {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VectorError>;
