//! Checkpoint Optimizer (CO, §4.6): learns the context-percent threshold at
//! which to request a checkpoint, and detects compaction events from
//! sudden token-count drops.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

const ROLLING_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct CheckpointConfig {
    pub start: f64,
    pub min: f64,
    pub max: f64,
    pub delta: f64,
    pub compaction_drop_tokens: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            start: 75.0,
            min: 60.0,
            max: 85.0,
            delta: 2.0,
            compaction_drop_tokens: 50_000,
        }
    }
}

/// Running mean/variance of "tokens until checkpoint" for one task pattern,
/// via Welford's online algorithm.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PatternStats {
    pub count: u64,
    pub mean: f64,
    m2: f64,
}

impl PatternStats {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompactionEvent {
    pub previous_tokens: u64,
    pub observed_tokens: u64,
    pub dropped: u64,
}

struct OptimizerState {
    threshold: f64,
    recent_outcomes: VecDeque<bool>,
    per_pattern: HashMap<String, PatternStats>,
    last_token_count: Option<u64>,
}

pub struct CheckpointOptimizer {
    state: Mutex<OptimizerState>,
    config: CheckpointConfig,
}

impl CheckpointOptimizer {
    pub fn new(config: CheckpointConfig) -> Self {
        Self {
            state: Mutex::new(OptimizerState {
                threshold: config.start,
                recent_outcomes: VecDeque::with_capacity(ROLLING_WINDOW),
                per_pattern: HashMap::new(),
                last_token_count: None,
            }),
            config,
        }
    }

    pub fn global_threshold(&self) -> f64 {
        self.state.lock().expect("checkpoint optimizer mutex poisoned").threshold
    }

    /// Blends the global threshold with this pattern's historical mean,
    /// falling back to the global value when the pattern has no history.
    pub fn suggested_threshold(&self, pattern: &str) -> f64 {
        let state = self.state.lock().expect("checkpoint optimizer mutex poisoned");
        match state.per_pattern.get(pattern) {
            Some(stats) if stats.count > 0 => (state.threshold + stats.mean) / 2.0,
            _ => state.threshold,
        }
        .clamp(self.config.min, self.config.max)
    }

    pub fn should_checkpoint(&self, context_percent: f64, pattern: &str) -> bool {
        context_percent >= self.suggested_threshold(pattern)
    }

    /// Records the outcome of a checkpoint and nudges the global threshold
    /// by `±delta`, decreasing after failures, increasing after a run of
    /// successes, bounded to `[min, max]`.
    pub fn record_outcome(&self, pattern: &str, context_percent_at_checkpoint: f64, success: bool) {
        let mut state = self.state.lock().expect("checkpoint optimizer mutex poisoned");
        if state.recent_outcomes.len() == ROLLING_WINDOW {
            state.recent_outcomes.pop_front();
        }
        state.recent_outcomes.push_back(success);

        let success_rate = if state.recent_outcomes.is_empty() {
            1.0
        } else {
            state.recent_outcomes.iter().filter(|s| **s).count() as f64 / state.recent_outcomes.len() as f64
        };

        if !success {
            state.threshold = (state.threshold - self.config.delta).max(self.config.min);
        } else if success_rate > 0.9 && state.recent_outcomes.len() == ROLLING_WINDOW {
            state.threshold = (state.threshold + self.config.delta).min(self.config.max);
        }

        state
            .per_pattern
            .entry(pattern.to_string())
            .or_default()
            .update(context_percent_at_checkpoint);
    }

    /// Returns `Some` when the newly observed token count dropped by at
    /// least `compaction_drop_tokens` relative to the previous observation,
    /// implying a compaction event occurred between the two samples.
    pub fn observe_token_count(&self, tokens: u64) -> Option<CompactionEvent> {
        let mut state = self.state.lock().expect("checkpoint optimizer mutex poisoned");
        let event = state.last_token_count.and_then(|previous| {
            if previous > tokens && previous - tokens >= self.config.compaction_drop_tokens {
                Some(CompactionEvent {
                    previous_tokens: previous,
                    observed_tokens: tokens,
                    dropped: previous - tokens,
                })
            } else {
                None
            }
        });
        state.last_token_count = Some(tokens);
        if let Some(event) = event {
            tracing::info!(dropped = event.dropped, "compaction event detected");
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_decreases_after_failure_and_is_bounded() {
        let co = CheckpointOptimizer::new(CheckpointConfig::default());
        for _ in 0..20 {
            co.record_outcome("implement", 70.0, false);
        }
        assert_eq!(co.global_threshold(), CheckpointConfig::default().min);
    }

    #[test]
    fn compaction_event_detected_on_large_drop() {
        let co = CheckpointOptimizer::new(CheckpointConfig::default());
        co.observe_token_count(100_000);
        let event = co.observe_token_count(40_000).expect("expected compaction event");
        assert_eq!(event.dropped, 60_000);
    }

    #[test]
    fn small_drop_is_not_a_compaction_event() {
        let co = CheckpointOptimizer::new(CheckpointConfig::default());
        co.observe_token_count(100_000);
        assert!(co.observe_token_count(90_000).is_none());
    }

    #[test]
    fn suggested_threshold_blends_pattern_history() {
        let co = CheckpointOptimizer::new(CheckpointConfig::default());
        co.record_outcome("implement", 80.0, true);
        let suggested = co.suggested_threshold("implement");
        assert!((suggested - 77.5).abs() < 0.01);
    }
}
