//! Human-in-Loop Detector (HIL, §4.7): classifies a proposed action as
//! requiring human review, and adapts its thresholds from feedback.

use std::sync::RwLock;

use regex::Regex;

use crate::domain::HilPattern;

const MIN_SUPPORT_FOR_THRESHOLD_ADJUSTMENT: u64 = 10;
const LOW_PRECISION_THRESHOLD: f64 = 0.7;
const THRESHOLD_STEP: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub triggered: bool,
    pub pattern_id: Option<String>,
    pub confidence: f64,
    pub highlighted_terms: Vec<String>,
}

pub struct HilDetector {
    patterns: RwLock<Vec<HilPattern>>,
}

impl HilDetector {
    pub fn new(patterns: Vec<HilPattern>) -> Self {
        Self {
            patterns: RwLock::new(patterns),
        }
    }

    pub fn with_builtin_patterns() -> Self {
        Self::new(builtin_patterns())
    }

    pub fn patterns(&self) -> Vec<HilPattern> {
        self.patterns.read().expect("hil detector lock poisoned").clone()
    }

    /// Runs every enabled pattern against `text`; the pattern with the
    /// highest confidence wins. `triggered` iff that confidence meets its
    /// own threshold (§4.7: triggered = max confidence ≥ pattern threshold).
    pub fn detect(&self, text: &str) -> DetectionResult {
        let patterns = self.patterns.read().expect("hil detector lock poisoned");
        let lowercase = text.to_lowercase();

        let mut best: Option<(f64, &HilPattern, Vec<String>)> = None;
        for pattern in patterns.iter().filter(|p| p.enabled) {
            let (confidence, highlights) = score_pattern(pattern, &lowercase);
            if best.as_ref().map(|(c, ..)| confidence > *c).unwrap_or(true) {
                best = Some((confidence, pattern, highlights));
            }
        }

        match best {
            Some((confidence, pattern, highlights)) if confidence >= pattern.confidence_threshold => DetectionResult {
                triggered: true,
                pattern_id: Some(pattern.id.clone()),
                confidence,
                highlighted_terms: highlights,
            },
            Some((confidence, pattern, _)) => DetectionResult {
                triggered: false,
                pattern_id: Some(pattern.id.clone()),
                confidence,
                highlighted_terms: Vec::new(),
            },
            None => DetectionResult {
                triggered: false,
                pattern_id: None,
                confidence: 0.0,
                highlighted_terms: Vec::new(),
            },
        }
    }

    /// Incorporates a human verdict on a prior detection and recomputes
    /// that pattern's precision/recall, raising its threshold on low
    /// precision (§4.7).
    pub fn record_feedback(&self, pattern_id: &str, predicted_triggered: bool, was_correct: bool) {
        let mut patterns = self.patterns.write().expect("hil detector lock poisoned");
        let Some(pattern) = patterns.iter_mut().find(|p| p.id == pattern_id) else {
            return;
        };

        match (predicted_triggered, was_correct) {
            (true, true) => pattern.feedback.true_positive += 1,
            (true, false) => pattern.feedback.false_positive += 1,
            (false, true) => pattern.feedback.true_negative += 1,
            (false, false) => pattern.feedback.false_negative += 1,
        }

        if pattern.feedback.support() >= MIN_SUPPORT_FOR_THRESHOLD_ADJUSTMENT {
            if let Some(precision) = pattern.feedback.precision() {
                if precision < LOW_PRECISION_THRESHOLD {
                    pattern.confidence_threshold = (pattern.confidence_threshold + THRESHOLD_STEP).min(1.0);
                }
            }
        }
    }
}

fn score_pattern(pattern: &HilPattern, lowercase_text: &str) -> (f64, Vec<String>) {
    let mut highlights = Vec::new();

    let keyword_hits = pattern
        .keywords
        .iter()
        .filter(|kw| {
            let found = lowercase_text.contains(kw.as_str());
            if found {
                highlights.push((*kw).clone());
            }
            found
        })
        .count();
    let keyword_score = if pattern.keywords.is_empty() {
        0.0
    } else {
        keyword_hits as f64 / pattern.keywords.len() as f64
    };

    let regex_hits = pattern
        .regex_fragments
        .iter()
        .filter(|fragment| match Regex::new(fragment) {
            Ok(re) => re.is_match(lowercase_text),
            Err(err) => {
                tracing::warn!(fragment = %fragment, error = %err, "invalid HIL regex fragment, skipping");
                false
            }
        })
        .count();
    let regex_score = if pattern.regex_fragments.is_empty() {
        0.0
    } else {
        regex_hits as f64 / pattern.regex_fragments.len() as f64
    };

    // Contextual booster: longer proposals tend to carry more consequential
    // changes; a coarse stand-in for a real contextual-booster model.
    let booster = if lowercase_text.len() > 400 { 1.0 } else { 0.0 };

    let (kw_weight, regex_weight, booster_weight) = pattern.weights;
    let confidence = kw_weight * keyword_score + regex_weight * regex_score + booster_weight * booster;
    (confidence.clamp(0.0, 1.0), highlights)
}

fn pattern_with_keywords(id: &str, name: &str, threshold: f64, keywords: &[&str]) -> HilPattern {
    let mut pattern = HilPattern::new(id, name, threshold);
    pattern.keywords = keywords.iter().map(|s| s.to_string()).collect();
    pattern
}

/// Default pattern families from §4.7: high-risk ops, design decisions,
/// manual tests, strategic choices, legal/compliance, external impact,
/// ambiguity.
fn builtin_patterns() -> Vec<HilPattern> {
    vec![
        pattern_with_keywords(
            "high-risk-ops",
            "High-risk operation",
            0.6,
            &["drop table", "delete from", "rm -rf", "force push", "production database"],
        ),
        pattern_with_keywords(
            "design-decision",
            "Design decision",
            0.55,
            &["architecture", "which approach", "trade-off", "design choice"],
        ),
        pattern_with_keywords("manual-test", "Manual test required", 0.5, &["manual test", "cannot be automated", "needs human verification"]),
        pattern_with_keywords(
            "strategic-choice",
            "Strategic choice",
            0.6,
            &["roadmap", "prioritize", "strategic direction", "long-term"],
        ),
        pattern_with_keywords(
            "legal-compliance",
            "Legal/compliance",
            0.65,
            &["gdpr", "compliance", "legal", "license", "regulation", "pii"],
        ),
        pattern_with_keywords(
            "external-impact",
            "External impact",
            0.6,
            &["public api", "breaking change", "customer-facing", "third-party"],
        ),
        pattern_with_keywords("ambiguity", "Ambiguous requirement", 0.5, &["unclear", "ambiguous", "not specified", "ask the user"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_high_risk_keyword() {
        let detector = HilDetector::with_builtin_patterns();
        let result = detector.detect("this migration will DROP TABLE users in production");
        assert!(result.triggered);
        assert_eq!(result.pattern_id.as_deref(), Some("high-risk-ops"));
    }

    #[test]
    fn benign_text_does_not_trigger() {
        let detector = HilDetector::with_builtin_patterns();
        let result = detector.detect("added a unit test for the parser");
        assert!(!result.triggered);
    }

    #[test]
    fn low_precision_raises_threshold_after_minimum_support() {
        let detector = HilDetector::with_builtin_patterns();
        for _ in 0..MIN_SUPPORT_FOR_THRESHOLD_ADJUSTMENT {
            detector.record_feedback("high-risk-ops", true, false);
        }
        let pattern = detector.patterns().into_iter().find(|p| p.id == "high-risk-ops").unwrap();
        assert!(pattern.confidence_threshold > 0.6);
    }
}
