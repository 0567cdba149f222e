//! Quality Gates (QG, §4.10): per-phase scoring of orchestration outputs
//! against configurable thresholds.

use std::collections::HashMap;

use crate::domain::{Phase, clamp_score};

#[derive(Debug, Clone, Copy)]
pub struct PhaseThresholds {
    pub research: u8,
    pub design: u8,
    pub implement: u8,
    pub test: u8,
    pub validate: u8,
}

impl Default for PhaseThresholds {
    fn default() -> Self {
        Self {
            research: 75,
            design: 80,
            implement: 85,
            test: 90,
            validate: 90,
        }
    }
}

impl PhaseThresholds {
    pub fn for_phase(&self, phase: Phase) -> u8 {
        match phase {
            Phase::Research => self.research,
            Phase::Design => self.design,
            Phase::Implement => self.implement,
            Phase::Test => self.test,
            Phase::Validate => self.validate,
        }
    }
}

/// Raw signal inputs evaluated per phase. Each sub-metric is already in
/// [0, 100]; phases use a different subset depending on what an
/// orchestration output for that phase can evidence.
#[derive(Debug, Clone, Default)]
pub struct PhaseSignals {
    pub completeness: Option<f64>,
    pub correctness: Option<f64>,
    pub clarity: Option<f64>,
    pub test_coverage: Option<f64>,
    pub risk_coverage: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct QualityResult {
    pub phase: Phase,
    pub score: u8,
    pub sub_scores: HashMap<String, f64>,
    pub threshold: u8,
    pub passed: bool,
}

/// Sub-metric weights per phase; phases emphasize the signals most
/// relevant to what that phase actually produces.
fn weights_for(phase: Phase) -> &'static [(&'static str, f64)] {
    match phase {
        Phase::Research => &[("completeness", 0.5), ("clarity", 0.5)],
        Phase::Design => &[("completeness", 0.4), ("clarity", 0.3), ("risk_coverage", 0.3)],
        Phase::Implement => &[("correctness", 0.5), ("completeness", 0.3), ("clarity", 0.2)],
        Phase::Test => &[("test_coverage", 0.6), ("correctness", 0.4)],
        Phase::Validate => &[("correctness", 0.5), ("test_coverage", 0.3), ("risk_coverage", 0.2)],
    }
}

fn signal_value(signals: &PhaseSignals, name: &str) -> Option<f64> {
    match name {
        "completeness" => signals.completeness,
        "correctness" => signals.correctness,
        "clarity" => signals.clarity,
        "test_coverage" => signals.test_coverage,
        "risk_coverage" => signals.risk_coverage,
        _ => None,
    }
}

pub struct QualityGate {
    thresholds: PhaseThresholds,
}

impl QualityGate {
    pub fn new(thresholds: PhaseThresholds) -> Self {
        Self { thresholds }
    }

    /// Scores `signals` for `phase`: a weighted average of the sub-metrics
    /// relevant to that phase, renormalized over whichever sub-metrics were
    /// actually supplied (a phase output missing a signal entirely does not
    /// get penalized as zero for it).
    pub fn evaluate(&self, phase: Phase, signals: &PhaseSignals) -> QualityResult {
        let weights = weights_for(phase);
        let mut sub_scores = HashMap::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for (name, weight) in weights {
            if let Some(value) = signal_value(signals, name) {
                let clamped = value.clamp(0.0, 100.0);
                sub_scores.insert((*name).to_string(), clamped);
                weighted_sum += clamped * weight;
                weight_total += weight;
            }
        }

        let score = if weight_total > 0.0 { clamp_score(weighted_sum / weight_total) } else { 0 };
        let threshold = self.thresholds.for_phase(phase);
        QualityResult {
            phase,
            score,
            sub_scores,
            threshold,
            passed: score >= threshold,
        }
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(PhaseThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_scores_above_threshold_passes() {
        let gate = QualityGate::default();
        let signals = PhaseSignals {
            completeness: Some(90.0),
            clarity: Some(85.0),
            ..Default::default()
        };
        let result = gate.evaluate(Phase::Research, &signals);
        assert!(result.passed);
        assert_eq!(result.threshold, 75);
    }

    #[test]
    fn missing_signals_do_not_count_as_zero() {
        let gate = QualityGate::default();
        let signals = PhaseSignals {
            completeness: Some(90.0),
            ..Default::default()
        };
        let result = gate.evaluate(Phase::Research, &signals);
        assert_eq!(result.score, 90);
    }

    #[test]
    fn no_signals_at_all_scores_zero_and_fails() {
        let gate = QualityGate::default();
        let result = gate.evaluate(Phase::Test, &PhaseSignals::default());
        assert_eq!(result.score, 0);
        assert!(!result.passed);
    }

    #[test]
    fn thresholds_are_configurable_per_phase() {
        let gate = QualityGate::new(PhaseThresholds { implement: 50, ..PhaseThresholds::default() });
        let signals = PhaseSignals {
            correctness: Some(60.0),
            completeness: Some(60.0),
            clarity: Some(60.0),
            ..Default::default()
        };
        let result = gate.evaluate(Phase::Implement, &signals);
        assert!(result.passed);
    }
}
