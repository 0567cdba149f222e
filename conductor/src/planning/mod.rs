//! Competitive Planner & Plan Evaluator (CP/PE, §4.9): generates one to
//! three candidate plans scaled to task complexity, scores them on five
//! weighted criteria, and ranks a winner.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{CriteriaBreakdown, Estimate, Phase, Plan, PlanAnalysis, PlanComparison, PlanStep, RankedPlan, Risk, RiskSeverity, Strategy, clamp_score};

const DEFAULT_COMPLEXITY_THRESHOLD: f64 = 40.0;
const DEFAULT_TIE_THRESHOLD: u8 = 10;
const CACHE_TTL: chrono::Duration = chrono::Duration::minutes(5);

/// Dependency tags inferred from keywords in the task description, §4.9.
const KEYWORD_TAGS: &[(&str, &str)] = &[
    ("database", "data-migration-risk"),
    ("api", "api-dependency"),
    ("auth", "security-review"),
    ("payment", "compliance-review"),
    ("ui", "design-review"),
    ("migrate", "rollback-plan-required"),
];

#[derive(Debug, Clone, Copy)]
pub struct PlanningConfig {
    pub complexity_threshold: f64,
    pub tie_threshold: u8,
    pub cache_ttl: chrono::Duration,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: DEFAULT_COMPLEXITY_THRESHOLD,
            tie_threshold: DEFAULT_TIE_THRESHOLD,
            cache_ttl: CACHE_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PlanningEvent {
    PlanEvaluated { task_id: String, plan_id: String, score: u8 },
    PlansCompared { task_id: String, winner_plan_id: String },
    PlansTie { task_id: String, plan_ids: Vec<String> },
}

struct CacheEntry {
    generated_at: DateTime<Utc>,
    plans: Vec<Plan>,
    comparison: PlanComparison,
}

pub struct CompetitivePlanner {
    config: PlanningConfig,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl CompetitivePlanner {
    pub fn new(config: PlanningConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(task_id: &str, complexity: f64) -> String {
        format!("{task_id}:{}", complexity.round() as i64)
    }

    /// Strategies at play for a given complexity score, §4.9.
    pub fn strategies_for_complexity(&self, complexity: f64) -> Vec<Strategy> {
        if complexity < self.config.complexity_threshold {
            vec![Strategy::Balanced]
        } else if complexity < 70.0 {
            vec![Strategy::Conservative, Strategy::Balanced]
        } else {
            vec![Strategy::Conservative, Strategy::Balanced, Strategy::Aggressive]
        }
    }

    /// Generates (or returns the cached) plans and comparison for a task.
    /// `force_regenerate` bypasses the TTL cache.
    pub fn generate_and_compare(&self, task_id: &str, title: &str, description: &str, complexity: f64, force_regenerate: bool) -> (Vec<Plan>, PlanComparison, Vec<PlanningEvent>) {
        let key = Self::cache_key(task_id, complexity);
        if !force_regenerate {
            let cache = self.cache.lock().expect("planner cache lock poisoned");
            if let Some(entry) = cache.get(&key) {
                if Utc::now() - entry.generated_at <= self.config.cache_ttl {
                    return (entry.plans.clone(), entry.comparison.clone(), Vec::new());
                }
            }
        }

        let strategies = self.strategies_for_complexity(complexity);
        let plans: Vec<Plan> = strategies.into_iter().map(|strategy| generate_plan(task_id, title, description, complexity, strategy)).collect();

        let mut events = Vec::new();
        let mut ranked = Vec::new();
        for plan in &plans {
            let breakdown = score_plan(plan, description);
            let score = combine_score(&breakdown);
            events.push(PlanningEvent::PlanEvaluated {
                task_id: task_id.to_string(),
                plan_id: plan.id.clone(),
                score,
            });
            ranked.push(RankedPlan {
                plan_id: plan.id.clone(),
                score,
                breakdown,
            });
        }
        ranked.sort_by(|a, b| b.score.cmp(&a.score));

        let winner_plan_id = ranked.first().map(|r| r.plan_id.clone()).unwrap_or_default();
        let margin = match (ranked.first(), ranked.get(1)) {
            (Some(a), Some(b)) => a.score.saturating_sub(b.score),
            _ => u8::MAX,
        };
        let needs_review = margin < self.config.tie_threshold && ranked.len() > 1;
        let review_reason = needs_review.then(|| format!("top two plans scored within {margin} points (tie-threshold {})", self.config.tie_threshold));

        events.push(PlanningEvent::PlansCompared {
            task_id: task_id.to_string(),
            winner_plan_id: winner_plan_id.clone(),
        });
        if needs_review {
            events.push(PlanningEvent::PlansTie {
                task_id: task_id.to_string(),
                plan_ids: ranked.iter().map(|r| r.plan_id.clone()).collect(),
            });
        }

        let comparison = PlanComparison {
            winner_plan_id,
            ranked,
            margin,
            needs_review,
            review_reason,
        };

        self.cache.lock().expect("planner cache lock poisoned").insert(
            key,
            CacheEntry {
                generated_at: Utc::now(),
                plans: plans.clone(),
                comparison: comparison.clone(),
            },
        );

        (plans, comparison, events)
    }
}

fn infer_dependency_tags(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    KEYWORD_TAGS.iter().filter(|(kw, _)| lower.contains(kw)).map(|(_, tag)| tag.to_string()).collect()
}

fn generate_plan(task_id: &str, title: &str, description: &str, complexity: f64, strategy: Strategy) -> Plan {
    let combined_text = format!("{title} {description}");
    let dependencies = infer_dependency_tags(&combined_text);

    let step_multiplier = match strategy {
        Strategy::Conservative => 1.3,
        Strategy::Balanced => 1.0,
        Strategy::Aggressive => 0.7,
    };

    let steps: Vec<PlanStep> = Phase::ORDER
        .iter()
        .enumerate()
        .map(|(i, phase)| PlanStep {
            order: i as u32,
            action: format!("{} for {title}", phase.name()),
            details: match strategy {
                Strategy::Conservative => format!("thorough {} with extra validation passes", phase.name()),
                Strategy::Balanced => format!("standard {} pass", phase.name()),
                Strategy::Aggressive => format!("fast {} pass, defer polish", phase.name()),
            },
            phase: *phase,
        })
        .collect();

    let mut risks = Vec::new();
    for tag in &dependencies {
        risks.push(Risk {
            description: format!("task touches a {tag} concern"),
            mitigation: format!("add a dedicated review step for {tag}"),
            severity: if strategy == Strategy::Aggressive { RiskSeverity::High } else { RiskSeverity::Medium },
        });
    }
    if strategy == Strategy::Aggressive {
        risks.push(Risk {
            description: "reduced validation depth to move faster".to_string(),
            mitigation: "rely on quality gates to catch regressions".to_string(),
            severity: RiskSeverity::Medium,
        });
    }

    let base_hours = (complexity / 10.0).max(1.0);
    let estimate = Estimate {
        hours: base_hours * step_multiplier,
        complexity,
        confidence: match strategy {
            Strategy::Conservative => 0.85,
            Strategy::Balanced => 0.75,
            Strategy::Aggressive => 0.6,
        },
    };

    let analysis = PlanAnalysis {
        complexity,
        risk_level: match strategy {
            Strategy::Conservative => complexity * 0.4,
            Strategy::Balanced => complexity * 0.55,
            Strategy::Aggressive => complexity * 0.75,
        },
        innovation_level: match strategy {
            Strategy::Conservative => 20.0,
            Strategy::Balanced => 50.0,
            Strategy::Aggressive => 80.0,
        },
    };

    Plan {
        id: Uuid::now_v7().to_string(),
        task_id: task_id.to_string(),
        strategy,
        steps,
        risks,
        estimate,
        dependencies,
        analysis,
        created_at: Utc::now(),
    }
}

/// Scores a plan on the five §4.9 criteria, each in [0, 100].
fn score_plan(plan: &Plan, description: &str) -> CriteriaBreakdown {
    let completeness = (plan.steps.len() as f64 / Phase::ORDER.len() as f64 * 100.0).min(100.0);
    let feasibility = (plan.estimate.confidence * 100.0).min(100.0);
    let risk = (100.0 - plan.analysis.risk_level).clamp(0.0, 100.0);
    let clarity = if description.len() > 20 { 80.0 } else { 60.0 };
    let efficiency = match plan.strategy {
        Strategy::Aggressive => 90.0,
        Strategy::Balanced => 75.0,
        Strategy::Conservative => 60.0,
    };
    CriteriaBreakdown {
        completeness,
        feasibility,
        risk,
        clarity,
        efficiency,
    }
}

fn combine_score(breakdown: &CriteriaBreakdown) -> u8 {
    let weighted = breakdown.completeness * 0.25 + breakdown.feasibility * 0.25 + breakdown.risk * 0.20 + breakdown.clarity * 0.15 + breakdown.efficiency * 0.15;
    clamp_score(weighted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_complexity_generates_a_single_balanced_plan() {
        let planner = CompetitivePlanner::new(PlanningConfig::default());
        let (plans, _comparison, _events) = planner.generate_and_compare("t1", "small fix", "tweak a typo", 32.0, false);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].strategy, Strategy::Balanced);
    }

    #[test]
    fn high_complexity_generates_three_plans_with_all_strategies() {
        let planner = CompetitivePlanner::new(PlanningConfig::default());
        let (plans, _comparison, _events) = planner.generate_and_compare("t2", "migrate authentication to oauth2", "replace the login system", 72.0, false);
        assert_eq!(plans.len(), 3);
        let strategies: std::collections::HashSet<_> = plans.iter().map(|p| p.strategy).collect();
        assert_eq!(strategies.len(), 3);
    }

    #[test]
    fn dependency_tags_are_inferred_from_keywords() {
        let planner = CompetitivePlanner::new(PlanningConfig::default());
        let (plans, _comparison, _events) = planner.generate_and_compare("t3", "migrate the database", "move the users table", 50.0, false);
        assert!(plans[0].dependencies.contains(&"data-migration-risk".to_string()));
        assert!(plans[0].dependencies.contains(&"rollback-plan-required".to_string()));
    }

    #[test]
    fn repeated_calls_within_ttl_return_identical_results_unless_forced() {
        let planner = CompetitivePlanner::new(PlanningConfig::default());
        let (plans_a, _, _) = planner.generate_and_compare("t4", "title", "desc", 50.0, false);
        let (plans_b, _, _) = planner.generate_and_compare("t4", "title", "desc", 50.0, false);
        assert_eq!(plans_a[0].created_at, plans_b[0].created_at);

        let (plans_c, _, _) = planner.generate_and_compare("t4", "title", "desc", 50.0, true);
        assert_ne!(plans_a[0].id, plans_c[0].id);
    }

    #[test]
    fn close_scores_are_flagged_for_review() {
        let planner = CompetitivePlanner::new(PlanningConfig {
            tie_threshold: 100,
            ..PlanningConfig::default()
        });
        let (_plans, comparison, events) = planner.generate_and_compare("t5", "migrate authentication to oauth2", "replace the login system", 72.0, false);
        assert!(comparison.needs_review);
        assert!(events.iter().any(|e| matches!(e, PlanningEvent::PlansTie { .. })));
    }
}
