//! Metric Sample (§3): one point in the dashboard's tiered metrics store.
//! Warm-tier samples are persisted via `conductor_store`; hot-tier samples
//! live only in the in-memory ring (see `dashboard::metrics`).

use chrono::{DateTime, Utc};
use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub quality_score: Option<u8>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub delegations: u64,
    pub delegation_successes: u64,
}

impl MetricSample {
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            timestamp,
            tokens_in: 0,
            tokens_out: 0,
            cost_usd: 0.0,
            quality_score: None,
            tasks_completed: 0,
            tasks_failed: 0,
            delegations: 0,
            delegation_successes: 0,
        }
    }

    pub fn delegation_success_rate(&self) -> f64 {
        if self.delegations == 0 {
            0.0
        } else {
            self.delegation_successes as f64 / self.delegations as f64
        }
    }
}

impl Record for MetricSample {
    fn table() -> &'static str {
        "metric_samples"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["session_id"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "session_id" => Some(IndexValue::Text(self.session_id.clone())),
            _ => None,
        }
    }
}
