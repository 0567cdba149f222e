//! Confidence Monitor (CM, §4.11): blends five signals into a single
//! confidence score with a status tier.

use std::collections::HashMap;

use crate::domain::clamp_score;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceStatus {
    Healthy,
    Warning,
    Critical,
}

impl ConfidenceStatus {
    fn from_score(score: u8) -> Self {
        match score {
            70..=100 => ConfidenceStatus::Healthy,
            40..=69 => ConfidenceStatus::Warning,
            _ => ConfidenceStatus::Critical,
        }
    }
}

/// Raw, not-yet-normalized readings the caller collects from QG history,
/// the task backlog, and error counters.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs {
    /// Weighted average of recent QG scores, already in [0, 100].
    pub recent_quality_score: f64,
    /// Tasks completed per hour, this session.
    pub current_velocity: f64,
    /// Historical median tasks/hour for similar tasks.
    pub historical_median_velocity: f64,
    /// Iterations spent on the current task.
    pub iteration_count: u32,
    /// Iteration count considered "as good as it gets" for normalization.
    pub iteration_floor: u32,
    /// Errors observed / operations attempted, in [0, 1].
    pub error_rate: f64,
    /// Success rate on similar past tasks, in [0, 1].
    pub historical_success_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceWeights {
    pub quality: f64,
    pub velocity: f64,
    pub iteration: f64,
    pub error_rate: f64,
    pub historical: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            quality: 0.2,
            velocity: 0.2,
            iteration: 0.2,
            error_rate: 0.2,
            historical: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfidenceReport {
    pub overall: u8,
    pub breakdown: HashMap<String, f64>,
    pub status: ConfidenceStatus,
}

pub struct ConfidenceMonitor {
    weights: ConfidenceWeights,
}

impl ConfidenceMonitor {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    pub fn evaluate(&self, inputs: &ConfidenceInputs) -> ConfidenceReport {
        let quality = inputs.recent_quality_score.clamp(0.0, 100.0);

        let velocity = if inputs.historical_median_velocity > 0.0 {
            (inputs.current_velocity / inputs.historical_median_velocity * 100.0).clamp(0.0, 100.0)
        } else {
            100.0
        };

        // Fewer iterations is better; inverted against a configured floor.
        let iteration = if inputs.iteration_floor > 0 {
            (100.0 - (inputs.iteration_count as f64 / inputs.iteration_floor as f64 * 100.0)).clamp(0.0, 100.0)
        } else {
            100.0
        };

        let error_rate = (100.0 - inputs.error_rate.clamp(0.0, 1.0) * 100.0).clamp(0.0, 100.0);
        let historical = (inputs.historical_success_rate.clamp(0.0, 1.0) * 100.0).clamp(0.0, 100.0);

        let mut breakdown = HashMap::new();
        breakdown.insert("quality".to_string(), quality);
        breakdown.insert("velocity".to_string(), velocity);
        breakdown.insert("iteration".to_string(), iteration);
        breakdown.insert("error_rate".to_string(), error_rate);
        breakdown.insert("historical".to_string(), historical);

        let w = &self.weights;
        let weight_total = w.quality + w.velocity + w.iteration + w.error_rate + w.historical;
        let weighted = quality * w.quality + velocity * w.velocity + iteration * w.iteration + error_rate * w.error_rate + historical * w.historical;
        let overall = clamp_score(if weight_total > 0.0 { weighted / weight_total } else { 0.0 });

        ConfidenceReport {
            overall,
            breakdown,
            status: ConfidenceStatus::from_score(overall),
        }
    }
}

impl Default for ConfidenceMonitor {
    fn default() -> Self {
        Self::new(ConfidenceWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perfect_inputs() -> ConfidenceInputs {
        ConfidenceInputs {
            recent_quality_score: 100.0,
            current_velocity: 5.0,
            historical_median_velocity: 5.0,
            iteration_count: 0,
            iteration_floor: 10,
            error_rate: 0.0,
            historical_success_rate: 1.0,
        }
    }

    #[test]
    fn perfect_inputs_score_healthy() {
        let monitor = ConfidenceMonitor::default();
        let report = monitor.evaluate(&perfect_inputs());
        assert_eq!(report.overall, 100);
        assert_eq!(report.status, ConfidenceStatus::Healthy);
    }

    #[test]
    fn high_iteration_count_lowers_the_iteration_signal() {
        let monitor = ConfidenceMonitor::default();
        let mut inputs = perfect_inputs();
        inputs.iteration_count = 10;
        let report = monitor.evaluate(&inputs);
        assert_eq!(*report.breakdown.get("iteration").unwrap(), 0.0);
        assert!(report.overall < 100);
    }

    #[test]
    fn all_signals_poor_scores_critical() {
        let monitor = ConfidenceMonitor::default();
        let inputs = ConfidenceInputs {
            recent_quality_score: 10.0,
            current_velocity: 1.0,
            historical_median_velocity: 10.0,
            iteration_count: 10,
            iteration_floor: 10,
            error_rate: 0.9,
            historical_success_rate: 0.1,
        };
        let report = monitor.evaluate(&inputs);
        assert_eq!(report.status, ConfidenceStatus::Critical);
    }

    #[test]
    fn zero_historical_velocity_does_not_divide_by_zero() {
        let monitor = ConfidenceMonitor::default();
        let mut inputs = perfect_inputs();
        inputs.historical_median_velocity = 0.0;
        let report = monitor.evaluate(&inputs);
        assert_eq!(*report.breakdown.get("velocity").unwrap(), 100.0);
    }
}
