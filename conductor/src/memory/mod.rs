//! Memory Store (M, §4.1): durable, queryable record of orchestrations,
//! observations, tasks, and token usage. Owns the stores that every other
//! component builds on (dependency order M → V → CR → ...).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use conductor_store::{Filter, IndexValue, Store};

use crate::domain::{HilPattern, MetricSample, Observation, Orchestration, Plan, Task, TokenUsageRecord};
use crate::error::Result;

/// Raw-record retention window; hourly/daily roll-up retention belongs to
/// the dashboard's tiered metrics store (§4.16), not here.
#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    pub raw_hours: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { raw_hours: 24 }
    }
}

pub struct MemoryStore {
    orchestrations: Arc<Store<Orchestration>>,
    observations: Arc<Store<Observation>>,
    tasks: Arc<Store<Task>>,
    usage_records: Arc<Store<TokenUsageRecord>>,
    plans: Arc<Store<Plan>>,
    hil_patterns: Arc<Store<HilPattern>>,
    metric_samples: Arc<Store<MetricSample>>,
    retention: RetentionConfig,
}

impl MemoryStore {
    pub fn open(db_path: impl AsRef<Path>, retention: RetentionConfig) -> Result<Self> {
        let db_path = db_path.as_ref();
        Ok(Self {
            orchestrations: Arc::new(Store::open(db_path)?),
            observations: Arc::new(Store::open(db_path)?),
            tasks: Arc::new(Store::open(db_path)?),
            usage_records: Arc::new(Store::open(db_path)?),
            plans: Arc::new(Store::open(db_path)?),
            hil_patterns: Arc::new(Store::open(db_path)?),
            metric_samples: Arc::new(Store::open(db_path)?),
            retention,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            orchestrations: Arc::new(Store::open_in_memory()?),
            observations: Arc::new(Store::open_in_memory()?),
            tasks: Arc::new(Store::open_in_memory()?),
            usage_records: Arc::new(Store::open_in_memory()?),
            plans: Arc::new(Store::open_in_memory()?),
            hil_patterns: Arc::new(Store::open_in_memory()?),
            metric_samples: Arc::new(Store::open_in_memory()?),
            retention: RetentionConfig::default(),
        })
    }

    pub fn orchestrations(&self) -> Arc<Store<Orchestration>> {
        Arc::clone(&self.orchestrations)
    }

    pub fn observations(&self) -> Arc<Store<Observation>> {
        Arc::clone(&self.observations)
    }

    pub fn tasks(&self) -> Arc<Store<Task>> {
        Arc::clone(&self.tasks)
    }

    pub fn usage_records(&self) -> Arc<Store<TokenUsageRecord>> {
        Arc::clone(&self.usage_records)
    }

    pub fn plans(&self) -> Arc<Store<Plan>> {
        Arc::clone(&self.plans)
    }

    pub fn hil_patterns(&self) -> Arc<Store<HilPattern>> {
        Arc::clone(&self.hil_patterns)
    }

    pub fn metric_samples(&self) -> Arc<Store<MetricSample>> {
        Arc::clone(&self.metric_samples)
    }

    pub fn record_orchestration(&self, orchestration: &Orchestration) -> Result<()> {
        Ok(self.orchestrations.put(orchestration)?)
    }

    pub fn get_orchestration_by_id(&self, id: &str) -> Result<Option<Orchestration>> {
        Ok(self.orchestrations.get(id)?)
    }

    pub fn search_orchestrations_by_keywords(&self, query: &str, limit: usize) -> Result<Vec<(Orchestration, f64)>> {
        Ok(self.orchestrations.search_keywords(query, limit)?)
    }

    pub fn record_observation(&self, observation: &Observation) -> Result<()> {
        Ok(self.observations.put(observation)?)
    }

    pub fn search_observations_fts(&self, query: &str, limit: usize) -> Result<Vec<(Observation, f64)>> {
        Ok(self.observations.search_keywords(query, limit)?)
    }

    pub fn observations_for_orchestration(&self, orchestration_id: &str) -> Result<Vec<Observation>> {
        Ok(self.observations.query_indexed(&Filter::eq("orchestration_id", IndexValue::Text(orchestration_id.to_string())))?)
    }

    /// Arbitrary agent/pattern/date/success filtering over orchestrations.
    /// `date_from`/`date_to` bound `created_at`; other filters pass through
    /// to the indexed query.
    pub fn query_orchestrations(&self, filters: &[Filter], date_from: Option<DateTime<Utc>>, date_to: Option<DateTime<Utc>>) -> Result<Vec<Orchestration>> {
        let mut results = self.orchestrations.query(filters)?;
        if let Some(from) = date_from {
            results.retain(|o| o.created_at >= from);
        }
        if let Some(to) = date_to {
            results.retain(|o| o.created_at <= to);
        }
        Ok(results)
    }

    /// Deletes raw records older than the configured retention window.
    /// Hourly/daily roll-ups live in the dashboard's tiered store and are
    /// cleaned up there, not here.
    pub fn cleanup_old_records(&self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::hours(self.retention.raw_hours);
        let mut removed = 0;
        removed += self.usage_records.delete_older_than(cutoff)?;
        removed += self.metric_samples.delete_older_than(cutoff)?;
        Ok(removed)
    }
}
