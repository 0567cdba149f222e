//! Observation (§3): a note attached to an orchestration, surfaced to
//! later context retrieval.

use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationType {
    Decision,
    Bugfix,
    Feature,
    PatternUsage,
    Discovery,
    Refactor,
}

impl ObservationType {
    pub fn name(self) -> &'static str {
        match self {
            ObservationType::Decision => "decision",
            ObservationType::Bugfix => "bugfix",
            ObservationType::Feature => "feature",
            ObservationType::PatternUsage => "pattern-usage",
            ObservationType::Discovery => "discovery",
            ObservationType::Refactor => "refactor",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub orchestration_id: String,
    pub observation_type: ObservationType,
    pub content: String,
    pub concept_tags: Vec<String>,
    /// Clipped to [1, 10] by `new`/`set_importance`.
    pub importance: u8,
    pub agent_insights: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
}

impl Observation {
    pub fn new(
        id: impl Into<String>,
        orchestration_id: impl Into<String>,
        observation_type: ObservationType,
        content: impl Into<String>,
        importance: u8,
    ) -> Self {
        Self {
            id: id.into(),
            orchestration_id: orchestration_id.into(),
            observation_type,
            content: content.into(),
            concept_tags: Vec::new(),
            importance: importance.clamp(1, 10),
            agent_insights: BTreeMap::new(),
            recommendations: Vec::new(),
        }
    }

    /// Normalizes tags to lowercase per the §3 invariant.
    pub fn set_concept_tags(&mut self, tags: impl IntoIterator<Item = String>) {
        self.concept_tags = tags.into_iter().map(|t| t.to_lowercase()).collect();
    }

    pub fn set_importance(&mut self, importance: u8) {
        self.importance = importance.clamp(1, 10);
    }
}

impl Record for Observation {
    fn table() -> &'static str {
        "observations"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["orchestration_id", "observation_type"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "orchestration_id" => Some(IndexValue::Text(self.orchestration_id.clone())),
            "observation_type" => Some(IndexValue::Text(self.observation_type.name().to_string())),
            _ => None,
        }
    }

    fn searchable_text(&self) -> String {
        format!("{} {}", self.content, self.concept_tags.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_is_clamped_to_one_through_ten() {
        let mut o = Observation::new("o1", "orch1", ObservationType::Discovery, "x", 0);
        assert_eq!(o.importance, 1);
        o.set_importance(20);
        assert_eq!(o.importance, 10);
    }

    #[test]
    fn concept_tags_are_lowercased() {
        let mut o = Observation::new("o1", "orch1", ObservationType::Discovery, "x", 5);
        o.set_concept_tags(["Caching".to_string(), "API".to_string()]);
        assert_eq!(o.concept_tags, vec!["caching", "api"]);
    }
}
