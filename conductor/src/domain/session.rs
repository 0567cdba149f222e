//! Session Snapshot (§3): the dashboard-facing summary of one running CLO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub project_path: String,
    pub status: SessionStatus,
    pub context_percent_used: f64,
    pub current_task_summary: Option<String>,
    pub next_task_summary: Option<String>,
    pub phase: Option<super::task::Phase>,
    pub quality_score: Option<u8>,
    pub confidence_score: Option<u8>,
    pub cumulative_tokens: u64,
    pub cumulative_cost_usd: f64,
    pub runtime_seconds: u64,
    pub last_update: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(session_id: impl Into<String>, project_path: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            project_path: project_path.into(),
            status: SessionStatus::Idle,
            context_percent_used: 0.0,
            current_task_summary: None,
            next_task_summary: None,
            phase: None,
            quality_score: None,
            confidence_score: None,
            cumulative_tokens: 0,
            cumulative_cost_usd: 0.0,
            runtime_seconds: 0,
            last_update: Utc::now(),
        }
    }
}
