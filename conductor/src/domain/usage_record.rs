//! Token Usage Record (§3): a single recorded charge against an
//! orchestration, denormalized for fast aggregate queries.

use chrono::{DateTime, Utc};
use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};

use super::orchestration::{Pattern, TokenUsage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub id: String,
    pub orchestration_id: String,
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub cache_savings_usd: f64,
    pub cache_savings_percent: f64,
    pub pattern: Pattern,
    pub session_id: String,
}

impl Record for TokenUsageRecord {
    fn table() -> &'static str {
        "token_usage_records"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["session_id", "model", "pattern", "agent_id"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "session_id" => Some(IndexValue::Text(self.session_id.clone())),
            "model" => Some(IndexValue::Text(self.model.clone())),
            "pattern" => Some(IndexValue::Text(self.pattern.name().to_string())),
            "agent_id" => self.agent_id.clone().map(IndexValue::Text),
            _ => None,
        }
    }
}
