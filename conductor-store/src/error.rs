//! Error taxonomy for the memory store.

use thiserror::Error;

/// Errors surfaced by [`crate::Store`].
///
/// Per spec: a disk-full or similarly unrecoverable write failure is
/// reported as [`StoreError::PersistenceUnavailable`] rather than panicking
/// or silently dropping the write; callers decide whether to continue in
/// degraded mode.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("record not found: {table}/{id}")]
    NotFound { table: &'static str, id: String },

    #[error("claim conflict: {table}/{id} is already leased")]
    ClaimConflict { table: &'static str, id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
