//! Token usage accounting and cost estimation.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token counters reported by the optimizing agent, summed over a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Uncached input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Tokens written to the prompt cache
    pub cache_creation_tokens: u64,
    /// Tokens read from the prompt cache
    pub cache_read_tokens: u64,
}

impl TokenUsage {
    /// Estimated cost in USD under `pricing`, rounded to 4 decimal places.
    pub fn estimated_cost_usd(&self, pricing: &Pricing) -> f64 {
        let cost = (self.input_tokens as f64 * pricing.input_per_mtok
            + self.output_tokens as f64 * pricing.output_per_mtok
            + self.cache_creation_tokens as f64 * pricing.cache_write_per_mtok
            + self.cache_read_tokens as f64 * pricing.cache_read_per_mtok)
            / 1_000_000.0;
        (cost * 10_000.0).round() / 10_000.0
    }

    /// Sum of every counter.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_creation_tokens: self.cache_creation_tokens + other.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: TokenUsage) {
        *self = *self + other;
    }
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in / {} out | Cache: {} created / {} read",
            self.input_tokens, self.output_tokens, self.cache_creation_tokens, self.cache_read_tokens
        )
    }
}

/// Agent pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    /// Uncached input
    pub input_per_mtok: f64,
    /// Output
    pub output_per_mtok: f64,
    /// Cache writes
    pub cache_write_per_mtok: f64,
    /// Cache reads
    pub cache_read_per_mtok: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
            cache_write_per_mtok: 3.75,
            cache_read_per_mtok: 0.30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cache_creation_tokens: 5,
            cache_read_tokens: 0,
        };
        total += TokenUsage {
            input_tokens: 50,
            output_tokens: 10,
            cache_creation_tokens: 0,
            cache_read_tokens: 300,
        };
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.output_tokens, 30);
        assert_eq!(total.cache_creation_tokens, 5);
        assert_eq!(total.cache_read_tokens, 300);
        assert_eq!(total.total(), 485);
    }

    #[test]
    fn test_cost_estimate() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            cache_creation_tokens: 0,
            cache_read_tokens: 1_000_000,
        };
        // 3.0 + 1.5 + 0.3
        assert_eq!(usage.estimated_cost_usd(&Pricing::default()), 4.8);
    }

    #[test]
    fn test_cost_is_rounded_to_four_places() {
        let usage = TokenUsage {
            input_tokens: 1,
            ..Default::default()
        };
        assert_eq!(usage.estimated_cost_usd(&Pricing::default()), 0.0);
    }
}
