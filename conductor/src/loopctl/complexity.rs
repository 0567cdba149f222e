//! Complexity scoring that feeds into the §4.15 step 3 planning gate.
//!
//! Nowhere does the specification define this formula; it only says "call
//! ComplexityAnalyzer -> score" and compare against `complexity-threshold`.
//! This is a locally invented heuristic, built the way the competitive
//! planner's own scoring works: several bounded sub-signals combined with
//! fixed weights into a 0-100 score (see `planning::score_plan` for the
//! sibling pattern this follows).

use crate::domain::Task;

const LONG_DESCRIPTION_CHARS: usize = 400;
const MANY_CRITERIA: usize = 5;
const MANY_DEPENDENCIES: usize = 3;

/// Keywords that tend to correlate with higher-risk, higher-effort work;
/// mirrors the dependency-tag keyword list used by the planner itself.
const COMPLEXITY_KEYWORDS: &[&str] = &["migrate", "database", "auth", "payment", "security", "refactor", "rewrite", "distributed", "concurrency"];

/// Scores `task` in [0, 100] from description length, acceptance-criteria
/// count, dependency count, and keyword hits, each normalized and weighted.
pub fn score_complexity(task: &Task) -> f64 {
    let length_score = (task.description.len() as f64 / LONG_DESCRIPTION_CHARS as f64 * 100.0).min(100.0);
    let criteria_score = (task.acceptance_criteria.len() as f64 / MANY_CRITERIA as f64 * 100.0).min(100.0);
    let dependency_score = (task.dependencies.len() as f64 / MANY_DEPENDENCIES as f64 * 100.0).min(100.0);

    let lower = format!("{} {}", task.title, task.description).to_lowercase();
    let hits = COMPLEXITY_KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count();
    let keyword_score = (hits as f64 / 2.0 * 100.0).min(100.0);

    let weighted = length_score * 0.25 + criteria_score * 0.25 + dependency_score * 0.2 + keyword_score * 0.3;
    weighted.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AcceptanceCriterion, Priority};

    #[test]
    fn a_trivial_task_scores_low() {
        let task = Task::new("t1", "fix typo", Priority::Low);
        assert!(score_complexity(&task) < 20.0);
    }

    #[test]
    fn a_long_keyword_heavy_task_scores_high() {
        let mut task = Task::new("t2", "migrate the auth database", Priority::High);
        task.description = "a".repeat(500);
        for i in 0..6 {
            task.acceptance_criteria.push(AcceptanceCriterion { description: format!("criterion {i}"), met: false });
        }
        task.dependencies.insert("dep-a".to_string());
        task.dependencies.insert("dep-b".to_string());
        task.dependencies.insert("dep-c".to_string());
        task.dependencies.insert("dep-d".to_string());
        assert!(score_complexity(&task) > 70.0);
    }

    #[test]
    fn score_never_exceeds_one_hundred() {
        let mut task = Task::new("t3", "migrate database auth payment security refactor rewrite distributed concurrency", Priority::Critical);
        task.description = "a".repeat(5000);
        for i in 0..20 {
            task.acceptance_criteria.push(AcceptanceCriterion { description: format!("c{i}"), met: false });
        }
        assert!(score_complexity(&task) <= 100.0);
    }
}
