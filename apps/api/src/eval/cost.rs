use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::eval::TokenUsage;

#[derive(Debug, Error, PartialEq)]
pub enum CostError {
    #[error("No pricing configured for model '{0}'")]
    UnknownModel(String),
}

/// Price per 1K tokens, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelRate {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }
}

/// Built-in list prices (USD). Local llama models are free to run.
const DEFAULT_RATES: &[(&str, ModelRate)] = &[
    ("gpt-4", ModelRate::new(0.03, 0.06)),
    ("gpt-4-turbo", ModelRate::new(0.01, 0.03)),
    ("gpt-4o", ModelRate::new(0.005, 0.015)),
    ("gpt-4o-mini", ModelRate::new(0.000_15, 0.000_6)),
    ("gpt-3.5-turbo", ModelRate::new(0.000_5, 0.001_5)),
    ("claude-3-opus", ModelRate::new(0.015, 0.075)),
    ("claude-3-sonnet", ModelRate::new(0.003, 0.015)),
    ("claude-3-5-sonnet", ModelRate::new(0.003, 0.015)),
    ("claude-sonnet-4", ModelRate::new(0.003, 0.015)),
    ("claude-3-haiku", ModelRate::new(0.000_25, 0.001_25)),
    ("claude-3-5-haiku", ModelRate::new(0.000_8, 0.004)),
    ("llama", ModelRate::new(0.0, 0.0)),
];

/// Per-model rate table. Extend with [`CostTable::with_rate`].
#[derive(Debug, Clone)]
pub struct CostTable {
    rates: BTreeMap<String, ModelRate>,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|(model, rate)| (model.to_string(), *rate))
                .collect(),
        }
    }
}

impl CostTable {
    /// Adds or replaces the rate for `model`.
    pub fn with_rate(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.rates.insert(model.into(), rate);
        self
    }

    /// Exact match first, then the longest known id that prefixes `model`,
    /// so dated snapshots such as `claude-3-5-sonnet-20241022` resolve.
    pub fn rate(&self, model: &str) -> Option<&ModelRate> {
        self.rates.get(model).or_else(|| {
            self.rates
                .iter()
                .filter(|(known, _)| model.starts_with(known.as_str()))
                .max_by_key(|(known, _)| known.len())
                .map(|(_, rate)| rate)
        })
    }

    /// Linear cost of `usage` on `model`.
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Result<f64, CostError> {
        let rate = self
            .rate(model)
            .ok_or_else(|| CostError::UnknownModel(model.to_string()))?;

        let prompt = f64::from(usage.prompt_tokens) / 1000.0 * rate.prompt_per_1k;
        let completion = f64::from(usage.completion_tokens) / 1000.0 * rate.completion_per_1k;
        Ok(prompt + completion)
    }
}
