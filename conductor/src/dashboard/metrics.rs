//! Tiered metrics store (§4.16): a hot in-memory ring feeding `GET
//! /api/metrics`, flushed periodically into the warm persisted tier and
//! progressively rolled up into coarser-grained cold/archive samples.
//!
//! The ring-plus-flush shape mirrors the teacher's `LoopMetrics`
//! (`RwLock<HashMap<...>>` guarding per-key stats, a lock-scoped mutate,
//! and a read-side snapshot method) generalized from per-loop exec-id keys
//! to per-session dashboard samples. `conductor_store` gives us one
//! durable table (`MetricSample`, §3) rather than three separate schemas,
//! so "cold" and "archive" tiers are modeled as coarser rollup samples
//! written back into that same table and the finer-grained originals they
//! summarize deleted, instead of as physically distinct tables.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::MetricSample;
use crate::error::ConductorError;
use crate::memory::MemoryStore;

/// Hot tier: capped ring per session, default TTL 5 minutes / 60 samples.
const HOT_TTL: ChronoDuration = ChronoDuration::minutes(5);
const HOT_CAPACITY: usize = 60;

/// Warm tier (raw persisted samples) retention before being rolled into
/// hourly cold-tier aggregates.
pub const WARM_RETENTION: ChronoDuration = ChronoDuration::hours(24);
/// Cold tier (hourly rollups) retention before being rolled into daily
/// archive-tier aggregates.
pub const COLD_RETENTION: ChronoDuration = ChronoDuration::days(7);
/// Archive tier (daily rollups) retention before deletion outright.
pub const ARCHIVE_RETENTION: ChronoDuration = ChronoDuration::days(365);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Raw,
    Hourly,
    Daily,
}

pub struct MetricsStore {
    memory: Arc<MemoryStore>,
    hot: Mutex<HashMap<String, VecDeque<MetricSample>>>,
}

impl MetricsStore {
    pub fn new(memory: Arc<MemoryStore>) -> Self {
        Self {
            memory,
            hot: Mutex::new(HashMap::new()),
        }
    }

    /// Records one sample into the hot ring for its session, evicting
    /// anything past the TTL or capacity.
    pub async fn record(&self, sample: MetricSample) {
        let mut hot = self.hot.lock().await;
        let ring = hot.entry(sample.session_id.clone()).or_default();
        ring.push_back(sample);

        let cutoff = Utc::now() - HOT_TTL;
        while ring.front().is_some_and(|s| s.timestamp < cutoff) {
            ring.pop_front();
        }
        while ring.len() > HOT_CAPACITY {
            ring.pop_front();
        }
    }

    /// Hot -> warm flush (§4.16 cadence: every 60s). Moves everything
    /// currently in the ring into the persisted store; the ring itself
    /// keeps serving recent reads until its own TTL evicts them.
    pub async fn flush_hot_to_warm(&self) -> Result<usize, ConductorError> {
        let hot = self.hot.lock().await;
        let mut flushed = 0;
        for ring in hot.values() {
            for sample in ring {
                self.memory.metric_samples().put(sample)?;
                flushed += 1;
            }
        }
        debug!(flushed, "metrics: flushed hot ring to warm store");
        Ok(flushed)
    }

    /// Warm -> cold rollup (§4.16 cadence: hourly at minute 5, 2h overlap
    /// window to tolerate a missed run). Aggregates raw samples older than
    /// `WARM_RETENTION` into one hourly sample per session-hour bucket and
    /// deletes the originals they summarize.
    pub async fn rollup_warm_to_cold(&self) -> Result<usize, ConductorError> {
        let cutoff = Utc::now() - WARM_RETENTION + ChronoDuration::hours(2);
        self.rollup(cutoff, bucket_hour)
    }

    /// Cold -> archive rollup (§4.16 cadence: daily at 00:05, 2-day
    /// overlap). Aggregates hourly samples older than `COLD_RETENTION`
    /// into one daily sample per session-day bucket.
    pub async fn rollup_cold_to_archive(&self) -> Result<usize, ConductorError> {
        let cutoff = Utc::now() - COLD_RETENTION + ChronoDuration::days(2);
        self.rollup(cutoff, bucket_day)
    }

    fn rollup(&self, cutoff: DateTime<Utc>, bucket: fn(DateTime<Utc>) -> DateTime<Utc>) -> Result<usize, ConductorError> {
        let store = self.memory.metric_samples();
        let all = store.all()?;
        let mut buckets: HashMap<(String, DateTime<Utc>), Vec<MetricSample>> = HashMap::new();
        for sample in all.into_iter().filter(|s| s.timestamp < cutoff) {
            let key = (sample.session_id.clone(), bucket(sample.timestamp));
            buckets.entry(key).or_default().push(sample);
        }

        let mut rolled = 0;
        for ((session_id, bucket_start), samples) in buckets {
            if samples.len() <= 1 {
                continue;
            }
            let aggregate = aggregate_samples(&session_id, bucket_start, &samples);
            store.put(&aggregate)?;
            for sample in &samples {
                store.delete(&sample.id)?;
            }
            rolled += 1;
        }
        Ok(rolled)
    }

    /// Archive-tier retention cleanup (§4.16 cadence: every 5 minutes).
    /// Drops anything older than `ARCHIVE_RETENTION` regardless of tier.
    pub fn enforce_retention(&self) -> Result<usize, ConductorError> {
        let cutoff = Utc::now() - ARCHIVE_RETENTION;
        Ok(self.memory.metric_samples().delete_older_than(cutoff)?)
    }

    /// Serves `GET /api/metrics`: hot-ring samples for recency plus
    /// whatever warm/cold/archive samples fall in `since..`.
    pub async fn query(&self, session_id: Option<&str>, since: DateTime<Utc>) -> Result<Vec<MetricSample>, ConductorError> {
        let mut out = Vec::new();

        {
            let hot = self.hot.lock().await;
            for (sid, ring) in hot.iter() {
                if session_id.is_some_and(|want| want != sid) {
                    continue;
                }
                out.extend(ring.iter().filter(|s| s.timestamp >= since).cloned());
            }
        }

        let persisted = self.memory.metric_samples().all()?;
        out.extend(persisted.into_iter().filter(|s| {
            s.timestamp >= since && session_id.is_none_or(|want| want == s.session_id)
        }));

        out.sort_by_key(|s| s.timestamp);
        out.dedup_by(|a, b| a.id == b.id);
        Ok(out)
    }
}

fn bucket_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_hms_opt(ts.hour(), 0, 0).unwrap().and_utc()
}

fn bucket_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc()
}

/// Deterministic per-(session, bucket) id so a rollup that runs twice over
/// an overlapping window (§6.5 flush cadence overlaps) upserts the same
/// row instead of double-counting it.
fn bucket_id(session_id: &str, bucket_start: DateTime<Utc>) -> String {
    format!("rollup:{session_id}:{}", bucket_start.timestamp())
}

fn aggregate_samples(session_id: &str, bucket_start: DateTime<Utc>, samples: &[MetricSample]) -> MetricSample {
    let mut out = MetricSample::new(session_id, bucket_start);
    out.id = bucket_id(session_id, bucket_start);
    let mut quality_total = 0u32;
    let mut quality_count = 0u32;
    for sample in samples {
        out.tokens_in += sample.tokens_in;
        out.tokens_out += sample.tokens_out;
        out.cost_usd += sample.cost_usd;
        out.tasks_completed += sample.tasks_completed;
        out.tasks_failed += sample.tasks_failed;
        out.delegations += sample.delegations;
        out.delegation_successes += sample.delegation_successes;
        if let Some(q) = sample.quality_score {
            quality_total += q as u32;
            quality_count += 1;
        }
    }
    if quality_count > 0 {
        out.quality_score = Some((quality_total / quality_count) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(session_id: &str, ts: DateTime<Utc>, tokens_in: u64) -> MetricSample {
        let mut s = MetricSample::new(session_id, ts);
        s.tokens_in = tokens_in;
        s
    }

    #[tokio::test]
    async fn hot_ring_caps_at_capacity_per_session() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let store = MetricsStore::new(memory);
        for i in 0..(HOT_CAPACITY + 10) {
            store.record(sample_at("s1", Utc::now(), i as u64)).await;
        }
        let results = store.query(Some("s1"), Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        assert!(results.len() <= HOT_CAPACITY);
    }

    #[tokio::test]
    async fn flush_persists_hot_samples_into_the_warm_store() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let store = MetricsStore::new(memory.clone());
        store.record(sample_at("s1", Utc::now(), 42)).await;
        let flushed = store.flush_hot_to_warm().await.unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(memory.metric_samples().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn rollup_combines_old_samples_into_one_bucket() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let store = MetricsStore::new(memory.clone());
        let old = Utc::now() - ChronoDuration::hours(30);
        memory.metric_samples().put(&sample_at("s1", old, 10)).unwrap();
        memory.metric_samples().put(&sample_at("s1", old + ChronoDuration::minutes(5), 20)).unwrap();

        let rolled = store.rollup_warm_to_cold().await.unwrap();
        assert_eq!(rolled, 1);
        let remaining = memory.metric_samples().all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tokens_in, 30);
    }

    #[tokio::test]
    async fn query_merges_hot_and_persisted_samples() {
        let memory = Arc::new(MemoryStore::open_in_memory().unwrap());
        let store = MetricsStore::new(memory.clone());
        memory.metric_samples().put(&sample_at("s1", Utc::now(), 5)).unwrap();
        store.record(sample_at("s1", Utc::now(), 7)).await;

        let results = store.query(Some("s1"), Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
