//! Usage Tracker and Cost Calculator (U, §4.4).

mod pricing;
mod tracker;

pub use pricing::{ModelPrice, ModelPriceTable};
pub use tracker::{AlertLevel, BudgetStatus, Period, UsageFilters, UsageSummary, UsageTracker};
