//! Error taxonomy (§7). Each variant dictates a distinct retry/surface
//! policy in the loop controller; see `loopctl::safety` for how each is
//! handled.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    /// Network hiccup, temporary unavailability, timeout: retried with
    /// backoff+jitter up to a configured attempt count.
    #[error("transient error: {0}")]
    Transient(String),

    /// Retried only after the limit tracker's reported reset, or surfaced
    /// as a typed failure once past the wrap-up budget.
    #[error("rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimited { message: String, retry_after_secs: u64 },

    /// Model rejected the task or returned an invalid output schema. Not
    /// retried; surfaces as an orchestration failure.
    #[error("fatal agent error: {0}")]
    FatalAgent(String),

    /// A store write failed. The orchestration continues with in-memory
    /// state; background retry flushes it.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Claim leased to another owner, a dependency unmet, or some other
    /// broken precondition. The caller must abort the current operation.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Not an error in the failure sense: blocks progress and surfaces to
    /// the dashboard for a human decision (HIL positive, tied plans).
    #[error("user review required: {0}")]
    UserReviewRequired(String),

    #[error(transparent)]
    Vector(#[from] conductor_context::VectorError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<conductor_store::StoreError> for ConductorError {
    fn from(err: conductor_store::StoreError) -> Self {
        match err {
            conductor_store::StoreError::PersistenceUnavailable(msg) => ConductorError::PersistenceUnavailable(msg),
            conductor_store::StoreError::NotFound { table, id } => ConductorError::InvariantViolation(format!("{table}/{id} not found")),
            conductor_store::StoreError::ClaimConflict { table, id } => ConductorError::InvariantViolation(format!("claim conflict on {table}/{id}")),
            other => ConductorError::PersistenceUnavailable(other.to_string()),
        }
    }
}

impl ConductorError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ConductorError::Transient(_) | ConductorError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConductorError>;
