//! Message-Limit Window (§3): a rolling message-count window at one of
//! three scales, tracked by the Limit Tracker.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    FiveHour,
    Daily,
    Weekly,
}

impl WindowKind {
    pub fn duration(self) -> Duration {
        match self {
            WindowKind::FiveHour => Duration::hours(5),
            WindowKind::Daily => Duration::days(1),
            WindowKind::Weekly => Duration::weeks(1),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowKind::FiveHour => "five_hour",
            WindowKind::Daily => "daily",
            WindowKind::Weekly => "weekly",
        }
    }
}

/// Count ≤ limit is not enforced here; the tracker reports over-usage
/// rather than rejecting it (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLimitWindow {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub count: u64,
    pub limit: u64,
}

impl MessageLimitWindow {
    pub fn new(kind: WindowKind, start: DateTime<Utc>, limit: u64) -> Self {
        Self {
            kind,
            start,
            count: 0,
            limit,
        }
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.start + self.kind.duration()
    }

    pub fn percent_used(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            (self.count as f64 / self.limit as f64) * 100.0
        }
    }

    /// Starts a fresh window aligned to `now` if the current one has
    /// elapsed; otherwise increments in place.
    pub fn record_message(&mut self, now: DateTime<Utc>) {
        if now >= self.reset_at() {
            self.start = now;
            self.count = 1;
        } else {
            self.count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_resets_once_elapsed() {
        let start = Utc::now() - Duration::hours(6);
        let mut w = MessageLimitWindow::new(WindowKind::FiveHour, start, 50);
        w.count = 40;
        w.record_message(Utc::now());
        assert_eq!(w.count, 1);
    }

    #[test]
    fn percent_used_handles_zero_limit() {
        let w = MessageLimitWindow::new(WindowKind::Daily, Utc::now(), 0);
        assert_eq!(w.percent_used(), 0.0);
    }
}
