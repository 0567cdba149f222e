//! Per-error retry/surface policy (§7), consulted by the phase loop after
//! every fallible step so one call site doesn't have to know the taxonomy.

use std::time::Duration;

use crate::error::ConductorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry after the given backoff, counted against the loop's own
    /// iteration/attempt budget.
    RetryAfter,
    /// Retry only once the limit tracker's reported reset has elapsed.
    RetryAfterReset,
    /// Not retriable: record the failure and move on (task failed).
    Fail,
    /// Continue with best-effort degraded state; do not fail the task.
    Degrade,
    /// Surface to the dashboard for a human decision; block until resolved
    /// or a timeout fallback fires.
    SurfaceForReview,
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyDecision {
    pub action: ErrorAction,
    pub backoff: Option<Duration>,
}

/// Maps a `ConductorError` variant to the retry/surface policy described in
/// §7. `attempt` is the number of times this exact operation has already
/// been retried, used to compute exponential backoff for `RetryAfter`.
pub fn decide(error: &ConductorError, attempt: u32) -> SafetyDecision {
    match error {
        ConductorError::Transient(_) => SafetyDecision {
            action: ErrorAction::RetryAfter,
            backoff: Some(exponential_backoff(attempt)),
        },
        ConductorError::RateLimited { retry_after_secs, .. } => SafetyDecision {
            action: ErrorAction::RetryAfterReset,
            backoff: Some(Duration::from_secs(*retry_after_secs)),
        },
        ConductorError::FatalAgent(_) => SafetyDecision {
            action: ErrorAction::Fail,
            backoff: None,
        },
        ConductorError::PersistenceUnavailable(_) => SafetyDecision {
            action: ErrorAction::Degrade,
            backoff: None,
        },
        ConductorError::InvariantViolation(_) => SafetyDecision {
            action: ErrorAction::Fail,
            backoff: None,
        },
        ConductorError::UserReviewRequired(_) => SafetyDecision {
            action: ErrorAction::SurfaceForReview,
            backoff: None,
        },
        ConductorError::Vector(_) => SafetyDecision {
            action: ErrorAction::Degrade,
            backoff: None,
        },
        ConductorError::Io(_) => SafetyDecision {
            action: ErrorAction::RetryAfter,
            backoff: Some(exponential_backoff(attempt)),
        },
    }
}

const BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 30_000;

fn exponential_backoff(attempt: u32) -> Duration {
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(10)).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_retry_with_growing_backoff() {
        let a0 = decide(&ConductorError::Transient("x".into()), 0);
        let a3 = decide(&ConductorError::Transient("x".into()), 3);
        assert_eq!(a0.action, ErrorAction::RetryAfter);
        assert!(a3.backoff.unwrap() > a0.backoff.unwrap());
    }

    #[test]
    fn rate_limited_retries_after_the_reported_reset() {
        let decision = decide(&ConductorError::RateLimited { message: "slow down".into(), retry_after_secs: 42 }, 0);
        assert_eq!(decision.action, ErrorAction::RetryAfterReset);
        assert_eq!(decision.backoff, Some(Duration::from_secs(42)));
    }

    #[test]
    fn fatal_agent_and_invariant_violation_are_not_retried() {
        assert_eq!(decide(&ConductorError::FatalAgent("no".into()), 0).action, ErrorAction::Fail);
        assert_eq!(decide(&ConductorError::InvariantViolation("broken".into()), 0).action, ErrorAction::Fail);
    }

    #[test]
    fn persistence_and_vector_failures_degrade_rather_than_fail() {
        assert_eq!(decide(&ConductorError::PersistenceUnavailable("db down".into()), 0).action, ErrorAction::Degrade);
    }

    #[test]
    fn user_review_required_surfaces_for_review() {
        let decision = decide(&ConductorError::UserReviewRequired("tie".into()), 0);
        assert_eq!(decision.action, ErrorAction::SurfaceForReview);
    }

    #[test]
    fn backoff_is_capped() {
        let decision = decide(&ConductorError::Transient("x".into()), 100);
        assert_eq!(decision.backoff, Some(Duration::from_millis(MAX_BACKOFF_MS)));
    }
}
