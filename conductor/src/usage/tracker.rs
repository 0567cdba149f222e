//! Usage Tracker (U, §4.4): records token usage and evaluates budget
//! status. All failures are logged and swallowed — the orchestration must
//! never fail because the tracker couldn't persist a record.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use conductor_store::{Filter, IndexValue, Store};

use crate::domain::{Orchestration, Pattern, TokenUsage, TokenUsageRecord};

use super::pricing::ModelPriceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Monthly,
}

impl Period {
    fn window_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Daily => now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc(),
            Period::Monthly => now
                .date_naive()
                .with_day(1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
        }
    }

    fn window_end(self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Daily => start + Duration::days(1),
            Period::Monthly => {
                let next_month = if start.month() == 12 {
                    start.with_year(start.year() + 1).unwrap().with_month(1).unwrap()
                } else {
                    start.with_month(start.month() + 1).unwrap()
                };
                next_month
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageFilters {
    pub model: Option<String>,
    pub agent_id: Option<String>,
    pub pattern: Option<Pattern>,
}

impl UsageFilters {
    fn as_store_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(model) = &self.model {
            filters.push(Filter::eq("model", IndexValue::Text(model.clone())));
        }
        if let Some(agent_id) = &self.agent_id {
            filters.push(Filter::eq("agent_id", IndexValue::Text(agent_id.clone())));
        }
        if let Some(pattern) = self.pattern {
            filters.push(Filter::eq("pattern", IndexValue::Text(pattern.name().to_string())));
        }
        filters
    }
}

#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub cache_savings_usd: f64,
    pub record_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy)]
pub struct BudgetStatus {
    pub limit: f64,
    pub used: f64,
    pub percent: f64,
    pub projected: f64,
    pub exceeded: bool,
}

impl BudgetStatus {
    pub fn alert_level(&self, warning: f64, critical: f64) -> Option<AlertLevel> {
        if self.limit <= 0.0 {
            return None;
        }
        let fraction = self.used / self.limit;
        if fraction >= critical {
            Some(AlertLevel::Critical)
        } else if fraction >= warning {
            Some(AlertLevel::Warning)
        } else {
            None
        }
    }
}

pub struct UsageTracker {
    store: Arc<Store<TokenUsageRecord>>,
    prices: ModelPriceTable,
    daily_budget_usd: Option<f64>,
    monthly_budget_usd: Option<f64>,
}

impl UsageTracker {
    pub fn new(store: Arc<Store<TokenUsageRecord>>) -> Self {
        Self {
            store,
            prices: ModelPriceTable::default(),
            daily_budget_usd: None,
            monthly_budget_usd: None,
        }
    }

    pub fn with_prices(mut self, prices: ModelPriceTable) -> Self {
        self.prices = prices;
        self
    }

    pub fn with_daily_budget(mut self, budget: Option<f64>) -> Self {
        self.daily_budget_usd = budget;
        self
    }

    pub fn with_monthly_budget(mut self, budget: Option<f64>) -> Self {
        self.monthly_budget_usd = budget;
        self
    }

    /// Best-effort: errors are logged, never propagated.
    pub fn record_usage(&self, record: TokenUsageRecord) {
        if let Err(err) = self.store.put(&record) {
            tracing::warn!(error = %err, record_id = %record.id, "failed to persist token usage record");
        }
    }

    /// Builds and records a usage record for a completed orchestration,
    /// computing cost and cache savings from the price table.
    pub fn record_orchestration_usage(&self, orchestration: &Orchestration, model: &str, agent_id: Option<String>) {
        let price = self.prices.get(model);
        let cost = price.cost_for(&orchestration.usage);
        let (savings, savings_percent) = price.cache_savings(&orchestration.usage);
        let record = TokenUsageRecord {
            id: uuid::Uuid::now_v7().to_string(),
            orchestration_id: orchestration.id.clone(),
            agent_id,
            timestamp: Utc::now(),
            model: model.to_string(),
            usage: orchestration.usage,
            cost_usd: cost,
            cache_savings_usd: savings,
            cache_savings_percent: savings_percent,
            pattern: orchestration.pattern,
            session_id: orchestration.session_id.clone(),
        };
        self.record_usage(record);
    }

    pub fn usage_summary(&self, period: Period, filters: &UsageFilters) -> UsageSummary {
        let start = period.window_start(Utc::now());
        let end = period.window_end(start);
        let store_filters = filters.as_store_filters();
        let records = match self.store.query(&store_filters) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(error = %err, "usage summary query failed; returning empty summary");
                return UsageSummary::default();
            }
        };

        let mut summary = UsageSummary::default();
        for record in records.iter().filter(|r| r.timestamp >= start && r.timestamp < end) {
            summary.usage = summary.usage.checked_add(&record.usage);
            summary.cost_usd += record.cost_usd;
            summary.cache_savings_usd += record.cache_savings_usd;
            summary.record_count += 1;
        }
        summary
    }

    pub fn check_budget_status(&self, period: Period) -> Option<BudgetStatus> {
        let limit = match period {
            Period::Daily => self.daily_budget_usd,
            Period::Monthly => self.monthly_budget_usd,
        }?;

        let now = Utc::now();
        let start = period.window_start(now);
        let end = period.window_end(start);
        let summary = self.usage_summary(period, &UsageFilters::default());
        let elapsed_fraction = (now - start).num_seconds() as f64 / (end - start).num_seconds().max(1) as f64;
        let projected = if elapsed_fraction > 0.0 {
            summary.cost_usd / elapsed_fraction.clamp(0.001, 1.0)
        } else {
            summary.cost_usd
        };

        Some(BudgetStatus {
            limit,
            used: summary.cost_usd,
            percent: if limit > 0.0 { (summary.cost_usd / limit) * 100.0 } else { 0.0 },
            projected,
            exceeded: summary.cost_usd > limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pattern;

    fn tracker() -> UsageTracker {
        UsageTracker::new(Arc::new(Store::open_in_memory().unwrap())).with_daily_budget(Some(10.0))
    }

    #[test]
    fn record_and_summarize_round_trips() {
        let t = tracker();
        let orch = Orchestration::new("orch1", Pattern::Parallel, "task1", "session1");
        let mut orch = orch;
        orch.usage = TokenUsage {
            input: 1_000_000,
            output: 0,
            cache_create: 0,
            cache_read: 0,
        };
        t.record_orchestration_usage(&orch, "claude-3-5-sonnet-20241022", None);

        let summary = t.usage_summary(Period::Daily, &UsageFilters::default());
        assert_eq!(summary.record_count, 1);
        assert!((summary.cost_usd - 3.0).abs() < 1e-6);
    }

    #[test]
    fn budget_status_is_none_without_a_configured_limit() {
        let t = UsageTracker::new(Arc::new(Store::open_in_memory().unwrap()));
        assert!(t.check_budget_status(Period::Daily).is_none());
    }

    #[test]
    fn budget_status_flags_exceeded_once_over_limit() {
        let t = tracker();
        let mut orch = Orchestration::new("orch1", Pattern::Parallel, "task1", "session1");
        orch.usage = TokenUsage {
            input: 5_000_000,
            output: 0,
            cache_create: 0,
            cache_read: 0,
        };
        t.record_orchestration_usage(&orch, "claude-3-5-sonnet-20241022", None);
        let status = t.check_budget_status(Period::Daily).unwrap();
        assert!(status.exceeded);
    }
}
