//! Limit Tracker (L, §4.5): rolling message-count windows at three scales,
//! each tracked as a sliding sample log so old messages age out on read
//! rather than on a fixed epoch boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::domain::WindowKind;

const ALL_KINDS: [WindowKind; 3] = [WindowKind::FiveHour, WindowKind::Daily, WindowKind::Weekly];

#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    /// Messages/hour considered a sustainable pace for this plan.
    pub safe_pace_per_hour: f64,
    pub five_hour: u64,
    pub daily: u64,
    pub weekly: u64,
}

impl PlanLimits {
    pub fn free() -> Self {
        Self {
            safe_pace_per_hour: 5.0,
            five_hour: 50,
            daily: 50,
            weekly: 350,
        }
    }

    pub fn pro() -> Self {
        Self {
            safe_pace_per_hour: 50.0,
            five_hour: 450,
            daily: 1000,
            weekly: 7000,
        }
    }

    pub fn team() -> Self {
        Self {
            safe_pace_per_hour: 500.0,
            five_hour: 4500,
            daily: 10_000,
            weekly: 70_000,
        }
    }

    fn limit_for(&self, kind: WindowKind) -> u64 {
        match kind {
            WindowKind::FiveHour => self.five_hour,
            WindowKind::Daily => self.daily,
            WindowKind::Weekly => self.weekly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SafetyLevel {
    Ok,
    Warning,
    Critical,
    Emergency,
}

impl SafetyLevel {
    fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            SafetyLevel::Emergency
        } else if percent >= 75.0 {
            SafetyLevel::Critical
        } else if percent >= 50.0 {
            SafetyLevel::Warning
        } else {
            SafetyLevel::Ok
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowStatus {
    pub kind: WindowKind,
    pub count: u64,
    pub limit: u64,
    pub percent: f64,
    pub safety: SafetyLevel,
    pub estimated_reset: DateTime<Utc>,
    pub pace_per_hour: f64,
    pub safe_pace_per_hour: f64,
}

pub struct LimitTracker {
    samples: Mutex<HashMap<WindowKind, VecDeque<DateTime<Utc>>>>,
    plan: PlanLimits,
}

impl LimitTracker {
    pub fn new(plan: PlanLimits) -> Self {
        let mut samples = HashMap::new();
        for kind in ALL_KINDS {
            samples.insert(kind, VecDeque::new());
        }
        Self {
            samples: Mutex::new(samples),
            plan,
        }
    }

    pub fn record_message(&self) {
        self.record_message_at(Utc::now());
    }

    pub fn record_message_at(&self, now: DateTime<Utc>) {
        let mut samples = self.samples.lock().expect("limit tracker mutex poisoned");
        for kind in ALL_KINDS {
            let deque = samples.entry(kind).or_default();
            deque.push_back(now);
            prune(deque, kind.duration(), now);
        }
    }

    pub fn status(&self, kind: WindowKind) -> WindowStatus {
        self.status_at(kind, Utc::now())
    }

    pub fn status_at(&self, kind: WindowKind, now: DateTime<Utc>) -> WindowStatus {
        let mut samples = self.samples.lock().expect("limit tracker mutex poisoned");
        let deque = samples.entry(kind).or_default();
        prune(deque, kind.duration(), now);

        let count = deque.len() as u64;
        let limit = self.plan.limit_for(kind);
        let percent = if limit == 0 { 0.0 } else { (count as f64 / limit as f64) * 100.0 };
        let estimated_reset = deque.front().copied().map(|oldest| oldest + kind.duration()).unwrap_or(now);
        let window_hours = kind.duration().num_seconds() as f64 / 3600.0;
        let pace_per_hour = if window_hours > 0.0 { count as f64 / window_hours } else { 0.0 };

        WindowStatus {
            kind,
            count,
            limit,
            percent,
            safety: SafetyLevel::from_percent(percent),
            estimated_reset,
            pace_per_hour,
            safe_pace_per_hour: self.plan.safe_pace_per_hour,
        }
    }

    pub fn all_statuses(&self) -> Vec<WindowStatus> {
        ALL_KINDS.iter().map(|k| self.status(*k)).collect()
    }
}

fn prune(deque: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    while let Some(front) = deque.front() {
        if now - *front > window {
            deque.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_increments_and_recomputes_on_read() {
        let tracker = LimitTracker::new(PlanLimits::free());
        for _ in 0..10 {
            tracker.record_message();
        }
        let status = tracker.status(WindowKind::FiveHour);
        assert_eq!(status.count, 10);
        assert_eq!(status.safety, SafetyLevel::Warning);
    }

    #[test]
    fn stale_samples_age_out_of_the_window() {
        let tracker = LimitTracker::new(PlanLimits::free());
        let old = Utc::now() - Duration::hours(6);
        tracker.record_message_at(old);
        let status = tracker.status(WindowKind::FiveHour);
        assert_eq!(status.count, 0);
    }

    #[test]
    fn safety_levels_match_documented_thresholds() {
        assert_eq!(SafetyLevel::from_percent(10.0), SafetyLevel::Ok);
        assert_eq!(SafetyLevel::from_percent(50.0), SafetyLevel::Warning);
        assert_eq!(SafetyLevel::from_percent(75.0), SafetyLevel::Critical);
        assert_eq!(SafetyLevel::from_percent(90.0), SafetyLevel::Emergency);
    }
}
