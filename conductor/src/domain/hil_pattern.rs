//! HIL Pattern (§3): a configurable risk-classification rule used by the
//! Human-in-Loop Detector.

use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeedbackCounters {
    pub true_positive: u64,
    pub false_positive: u64,
    pub true_negative: u64,
    pub false_negative: u64,
}

impl FeedbackCounters {
    /// `None` when there is no signal yet (no positives predicted/observed).
    pub fn precision(&self) -> Option<f64> {
        let denom = self.true_positive + self.false_positive;
        (denom > 0).then(|| self.true_positive as f64 / denom as f64)
    }

    pub fn recall(&self) -> Option<f64> {
        let denom = self.true_positive + self.false_negative;
        (denom > 0).then(|| self.true_positive as f64 / denom as f64)
    }

    pub fn support(&self) -> u64 {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HilPattern {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    pub regex_fragments: Vec<String>,
    /// Per-signal weights: (keyword_weight, regex_weight, booster_weight).
    pub weights: (f64, f64, f64),
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub feedback: FeedbackCounters,
}

impl HilPattern {
    pub fn new(id: impl Into<String>, name: impl Into<String>, confidence_threshold: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            keywords: Vec::new(),
            regex_fragments: Vec::new(),
            weights: (0.5, 0.3, 0.2),
            enabled: true,
            confidence_threshold,
            feedback: FeedbackCounters::default(),
        }
    }
}

impl Record for HilPattern {
    fn table() -> &'static str {
        "hil_patterns"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["enabled"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "enabled" => Some(IndexValue::Bool(self.enabled)),
            _ => None,
        }
    }

    fn searchable_text(&self) -> String {
        format!("{} {}", self.name, self.keywords.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_and_recall_are_none_without_support() {
        let f = FeedbackCounters::default();
        assert_eq!(f.precision(), None);
        assert_eq!(f.recall(), None);
    }

    #[test]
    fn precision_and_recall_compute_from_counts() {
        let f = FeedbackCounters {
            true_positive: 8,
            false_positive: 2,
            true_negative: 5,
            false_negative: 2,
        };
        assert_eq!(f.precision(), Some(0.8));
        assert_eq!(f.recall(), Some(0.8));
    }
}
