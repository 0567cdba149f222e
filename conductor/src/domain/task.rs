//! Task (§3): the unit of work the Continuous Loop Orchestrator claims and
//! drives through phases.

use chrono::{DateTime, Utc};
use conductor_store::{IndexValue, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether `self -> next` is a legal transition (§3 invariant: strictly
    /// pending -> claimed -> in-progress -> (completed|failed)).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed) | (Claimed, InProgress) | (InProgress, Completed) | (InProgress, Failed)
                // A claim can be released back to pending (lease expiry, explicit release).
                | (Claimed, Pending)
                | (InProgress, Pending)
        )
    }
}

/// An advisory, denormalized copy of the authoritative claim row held by
/// `conductor_store::Store::claim`. Refreshed on every claim/heartbeat
/// round trip; never trusted for exclusivity decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub owner: String,
    pub lease_expiry: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub description: String,
    pub met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Research,
    Design,
    Implement,
    Test,
    Validate,
}

impl Phase {
    pub const ORDER: [Phase; 5] = [
        Phase::Research,
        Phase::Design,
        Phase::Implement,
        Phase::Test,
        Phase::Validate,
    ];

    pub fn index(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).unwrap()
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Design => "design",
            Phase::Implement => "implement",
            Phase::Test => "test",
            Phase::Validate => "validate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub phase: Phase,
    pub estimate_hours: f64,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub dependencies: BTreeSet<String>,
    pub status: TaskStatus,
    pub claim: Option<Claim>,
    pub result_summary: Option<String>,
    /// Quality gate scores recorded across iterations, oldest first.
    pub quality_history: Vec<u8>,
    pub iteration_count: u32,
    pub claim_failure_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority,
            phase: Phase::Research,
            estimate_hours: 0.0,
            acceptance_criteria: Vec::new(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            claim: None,
            result_summary: None,
            quality_history: Vec::new(),
            iteration_count: 0,
            claim_failure_count: 0,
            created_at: Utc::now(),
        }
    }

    /// All acceptance criteria have been met. The "met" set only grows
    /// within an attempt and resets entirely on failure (§4.8).
    pub fn acceptance_fully_met(&self) -> bool {
        !self.acceptance_criteria.is_empty() && self.acceptance_criteria.iter().all(|c| c.met)
    }

    pub fn reset_acceptance_criteria(&mut self) {
        for c in &mut self.acceptance_criteria {
            c.met = false;
        }
    }
}

impl Record for Task {
    fn table() -> &'static str {
        "tasks"
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn index_fields() -> &'static [&'static str] {
        &["status", "priority"]
    }

    fn index_value(&self, field: &str) -> Option<IndexValue> {
        match field {
            "status" => Some(IndexValue::Text(format!("{:?}", self.status))),
            "priority" => Some(IndexValue::Text(format!("{:?}", self.priority))),
            _ => None,
        }
    }

    fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_strict() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Claimed));
        assert!(TaskStatus::Claimed.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn acceptance_fully_met_requires_nonempty_and_all_true() {
        let mut t = Task::new("t1", "title", Priority::Medium);
        assert!(!t.acceptance_fully_met());
        t.acceptance_criteria.push(AcceptanceCriterion {
            description: "a".into(),
            met: true,
        });
        assert!(t.acceptance_fully_met());
        t.acceptance_criteria.push(AcceptanceCriterion {
            description: "b".into(),
            met: false,
        });
        assert!(!t.acceptance_fully_met());
    }
}
