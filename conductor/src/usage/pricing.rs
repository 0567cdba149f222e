//! Per-model pricing (§4.4): cost calculation from token counts, including
//! cache-create/cache-read buckets absent from a plain input/output model.

use std::collections::HashMap;

use crate::domain::TokenUsage;

#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_create_per_million: f64,
    pub cache_read_per_million: f64,
}

impl ModelPrice {
    pub fn new(input_per_million: f64, output_per_million: f64, cache_create_per_million: f64, cache_read_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cache_create_per_million,
            cache_read_per_million,
        }
    }

    pub fn cost_for(&self, usage: &TokenUsage) -> f64 {
        let million = 1_000_000.0;
        (usage.input as f64 / million) * self.input_per_million
            + (usage.output as f64 / million) * self.output_per_million
            + (usage.cache_create as f64 / million) * self.cache_create_per_million
            + (usage.cache_read as f64 / million) * self.cache_read_per_million
    }

    /// Cache savings = cache-read-tokens × (input-price − cache-read-price), §4.4.
    pub fn cache_savings(&self, usage: &TokenUsage) -> (f64, f64) {
        let million = 1_000_000.0;
        let per_token_savings = (self.input_per_million - self.cache_read_per_million) / million;
        let savings = usage.cache_read as f64 * per_token_savings.max(0.0);
        let would_be_cost = self.cost_for(usage) + savings;
        let percent = if would_be_cost > 0.0 { (savings / would_be_cost) * 100.0 } else { 0.0 };
        (savings, percent)
    }
}

#[derive(Debug, Clone)]
pub struct ModelPriceTable {
    prices: HashMap<String, ModelPrice>,
    default_price: ModelPrice,
}

impl ModelPriceTable {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            default_price: ModelPrice::new(3.00, 15.00, 3.75, 0.30),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.prices.insert(model.into(), price);
        self
    }

    /// Falls back to `default_price` for an unrecognized model rather than
    /// failing the orchestration over a pricing-table gap.
    pub fn get(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.default_price)
    }

    pub fn defaults() -> Self {
        Self::new()
            .with_model("claude-3-5-sonnet-20241022", ModelPrice::new(3.00, 15.00, 3.75, 0.30))
            .with_model("claude-3-opus-20240229", ModelPrice::new(15.00, 75.00, 18.75, 1.50))
            .with_model("claude-3-haiku-20240307", ModelPrice::new(0.25, 1.25, 0.30, 0.03))
            .with_model("gpt-4o", ModelPrice::new(2.50, 10.00, 2.50, 1.25))
            .with_model("gpt-4o-mini", ModelPrice::new(0.150, 0.600, 0.150, 0.075))
    }
}

impl Default for ModelPriceTable {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_for_sums_all_four_buckets() {
        let price = ModelPrice::new(3.0, 15.0, 3.75, 0.30);
        let usage = TokenUsage {
            input: 1_000_000,
            output: 1_000_000,
            cache_create: 1_000_000,
            cache_read: 1_000_000,
        };
        let cost = price.cost_for(&usage);
        assert!((cost - (3.0 + 15.0 + 3.75 + 0.30)).abs() < 1e-9);
    }

    #[test]
    fn cache_savings_is_zero_without_cache_reads() {
        let price = ModelPrice::new(3.0, 15.0, 3.75, 0.30);
        let usage = TokenUsage {
            input: 1000,
            output: 500,
            cache_create: 0,
            cache_read: 0,
        };
        let (savings, percent) = price.cache_savings(&usage);
        assert_eq!(savings, 0.0);
        assert_eq!(percent, 0.0);
    }
}
