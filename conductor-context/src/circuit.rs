//! Circuit breaker guarding the vector store (§4.2).
//!
//! Opens after `k` consecutive failures; after `cooldown` elapses it moves
//! to half-open and allows one probe call through. Every state transition
//! is logged; the breaker never panics or propagates "the breaker is
//! unhealthy" to anything other than the caller's own next call outcome.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Result, VectorError};

#[derive(Debug, Clone)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { opened_at: DateTime<Utc> },
    HalfOpen,
}

pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    k_consecutive_failures: u32,
    cooldown: chrono::Duration,
}

impl CircuitBreaker {
    pub fn new(k_consecutive_failures: u32, cooldown: chrono::Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::Closed { consecutive_failures: 0 }),
            k_consecutive_failures,
            cooldown,
        }
    }

    /// Default breaker: opens after 5 consecutive failures, half-opens
    /// after a 30 second cooldown.
    pub fn default_breaker() -> Self {
        Self::new(5, chrono::Duration::seconds(30))
    }

    fn should_allow(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        match *state {
            BreakerState::Closed { .. } => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open { opened_at } => {
                if Utc::now() - opened_at >= self.cooldown {
                    info!("circuit breaker: cooldown elapsed, moving to half-open");
                    *state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        if !matches!(*state, BreakerState::Closed { consecutive_failures: 0 }) {
            info!("circuit breaker: closing after success");
        }
        *state = BreakerState::Closed { consecutive_failures: 0 };
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        match *state {
            BreakerState::Closed { consecutive_failures } => {
                let consecutive_failures = consecutive_failures + 1;
                if consecutive_failures >= self.k_consecutive_failures {
                    warn!(consecutive_failures, "circuit breaker: opening after consecutive failures");
                    *state = BreakerState::Open { opened_at: Utc::now() };
                } else {
                    *state = BreakerState::Closed { consecutive_failures };
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker: probe failed, re-opening");
                *state = BreakerState::Open { opened_at: Utc::now() };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Run `f` through the breaker. If the breaker is open, `f` is never
    /// called and `VectorError::CircuitOpen` is returned; callers in the
    /// Context Retriever catch this specific variant and fall back to
    /// keyword-only results without surfacing an error further up.
    pub fn call<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.should_allow() {
            return Err(VectorError::CircuitOpen);
        }
        match f() {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock().expect("circuit breaker mutex poisoned"), BreakerState::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_k_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, chrono::Duration::seconds(60));
        for _ in 0..2 {
            let _ = breaker.call(|| Err::<(), _>(VectorError::DimensionMismatch {
                collection: "x".into(),
                expected: 1,
                actual: 2,
            }));
        }
        assert!(!breaker.is_open());
        let _ = breaker.call(|| Err::<(), _>(VectorError::DimensionMismatch {
            collection: "x".into(),
            expected: 1,
            actual: 2,
        }));
        assert!(breaker.is_open());
    }

    #[test]
    fn rejects_calls_while_open() {
        let breaker = CircuitBreaker::new(1, chrono::Duration::seconds(60));
        let _ = breaker.call(|| Err::<(), _>(VectorError::CircuitOpen));
        assert!(breaker.is_open());
        let result = breaker.call(|| Ok(42));
        assert!(matches!(result, Err(VectorError::CircuitOpen)));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, chrono::Duration::seconds(60));
        let _ = breaker.call(|| Err::<(), _>(VectorError::CircuitOpen));
        let _ = breaker.call(|| Ok(1));
        let _ = breaker.call(|| Err::<(), _>(VectorError::CircuitOpen));
        assert!(!breaker.is_open());
    }
}
