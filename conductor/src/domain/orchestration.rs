//! Orchestration (§3): one execution of the Agent Orchestrator against a
//! single task, using one collaboration pattern.

use chrono::{DateTime, Utc};
use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Parallel,
    Consensus,
    Debate,
    Review,
    Ensemble,
}

impl Pattern {
    pub fn name(self) -> &'static str {
        match self {
            Pattern::Parallel => "parallel",
            Pattern::Consensus => "consensus",
            Pattern::Debate => "debate",
            Pattern::Review => "review",
            Pattern::Ensemble => "ensemble",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_create: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_create + self.cache_read
    }

    pub fn checked_add(&self, other: &TokenUsage) -> Self {
        Self {
            input: self.input + other.input,
            output: self.output + other.output,
            cache_create: self.cache_create + other.cache_create,
            cache_read: self.cache_read + other.cache_read,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    pub id: String,
    pub pattern: Pattern,
    pub agent_ids: Vec<String>,
    pub task_id: String,
    pub inputs: serde_json::Value,
    pub result_summary: String,
    /// Exactly one terminal outcome: `None` while still running.
    pub success: Option<bool>,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
    pub concept_tags: Vec<String>,
}

impl Orchestration {
    pub fn new(id: impl Into<String>, pattern: Pattern, task_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pattern,
            agent_ids: Vec::new(),
            task_id: task_id.into(),
            inputs: serde_json::Value::Null,
            result_summary: String::new(),
            success: None,
            duration_ms: 0,
            usage: TokenUsage::default(),
            cost_usd: 0.0,
            created_at: Utc::now(),
            session_id: session_id.into(),
            concept_tags: Vec::new(),
        }
    }

    /// Recompute cost from token usage and a per-million-token model price
    /// (§3 invariant: cost is recomputed from tokens+model price, never
    /// trusted as an independently mutable field).
    pub fn recompute_cost(&mut self, price: &crate::usage::ModelPrice) {
        self.cost_usd = price.cost_for(&self.usage);
    }
}

impl Record for Orchestration {
    fn table() -> &'static str {
        "orchestrations"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["task_id", "pattern", "session_id"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "task_id" => Some(IndexValue::Text(self.task_id.clone())),
            "pattern" => Some(IndexValue::Text(self.pattern.name().to_string())),
            "session_id" => Some(IndexValue::Text(self.session_id.clone())),
            _ => None,
        }
    }

    fn searchable_text(&self) -> String {
        format!("{} {}", self.result_summary, self.concept_tags.join(" "))
    }
}
