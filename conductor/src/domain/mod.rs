//! Domain types for the orchestrator.
//!
//! These are the structs named in spec.md §3. Each persisted type
//! implements `conductor_store::Record`; the store itself has no
//! knowledge of their shape.

mod hil_pattern;
mod limit_window;
mod metric_sample;
mod observation;
mod orchestration;
mod plan;
mod session;
mod task;
mod usage_record;

pub use hil_pattern::HilPattern;
pub use limit_window::{MessageLimitWindow, WindowKind};
pub use metric_sample::MetricSample;
pub use observation::{Observation, ObservationType};
pub use orchestration::{Orchestration, Pattern, TokenUsage};
pub use plan::{
    CriteriaBreakdown, Estimate, Plan, PlanAnalysis, PlanComparison, PlanStep, RankedPlan, Risk, RiskSeverity, Strategy,
};
pub use session::{SessionSnapshot, SessionStatus};
pub use task::{AcceptanceCriterion, Claim, Phase, Priority, Task, TaskStatus};
pub use usage_record::TokenUsageRecord;

/// A quality/confidence score, normalized to 0-100 internally regardless
/// of the scale used at any external boundary (Open Question #2).
pub type Score = u8;

pub fn clamp_score(value: f64) -> Score {
    value.round().clamp(0.0, 100.0) as Score
}
