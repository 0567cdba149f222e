//! Plan & Plan Comparison (§3): the outputs of the Competitive Planner and
//! Plan Evaluator.

use chrono::{DateTime, Utc};
use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Conservative,
    Balanced,
    Aggressive,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Conservative => "conservative",
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub order: u32,
    pub action: String,
    pub details: String,
    pub phase: super::task::Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub mitigation: String,
    pub severity: RiskSeverity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Estimate {
    pub hours: f64,
    pub complexity: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanAnalysis {
    pub complexity: f64,
    pub risk_level: f64,
    pub innovation_level: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub task_id: String,
    pub strategy: Strategy,
    pub steps: Vec<PlanStep>,
    pub risks: Vec<Risk>,
    pub estimate: Estimate,
    pub dependencies: Vec<String>,
    pub analysis: PlanAnalysis,
    pub created_at: DateTime<Utc>,
}

impl Record for Plan {
    fn table() -> &'static str {
        "plans"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["task_id", "strategy"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "task_id" => Some(IndexValue::Text(self.task_id.clone())),
            "strategy" => Some(IndexValue::Text(self.strategy.name().to_string())),
            _ => None,
        }
    }
}

/// One entry in a plan comparison's ranked list, §4.9: completeness 0.25,
/// feasibility 0.25, risk 0.20, clarity 0.15, efficiency 0.15.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CriteriaBreakdown {
    pub completeness: f64,
    pub feasibility: f64,
    pub risk: f64,
    pub clarity: f64,
    pub efficiency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPlan {
    pub plan_id: String,
    pub score: u8,
    pub breakdown: CriteriaBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanComparison {
    pub winner_plan_id: String,
    pub ranked: Vec<RankedPlan>,
    pub margin: u8,
    pub needs_review: bool,
    pub review_reason: Option<String>,
}
