//! Cost calculation for agent runs.
//!
//! A run's cost has two parts: LLM tokens (priced from a per-model table) and
//! remote browser time. Providers that report their own cost in USD or in
//! credits bypass the token table.

use serde::{Deserialize, Serialize};

/// Remote browser session price in USD per hour.
pub const BROWSER_COST_PER_HOUR: f64 = 0.20;

/// USD value of one provider credit.
pub const USD_PER_CREDIT: f64 = 0.01;

/// Model pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_per_million: f64,
}

impl ModelPricing {
    const fn new(input: f64, output: f64, cached: f64) -> Self {
        Self {
            input_per_million: input,
            output_per_million: output,
            cached_per_million: cached,
        }
    }
}

/// Used for any model missing from the table (the browser-use house model rates).
pub const DEFAULT_PRICING: ModelPricing = ModelPricing::new(0.50, 3.00, 0.10);

/// Token usage reported by a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_tokens: u64,
    /// Provider-specific credits, when the provider bills that way
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<f64>,
}

impl UsageSummary {
    pub fn new(input_tokens: u64, output_tokens: u64, cached_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            cached_tokens,
            total_tokens: input_tokens + output_tokens,
            credits: None,
        }
    }

    pub fn from_credits(credits: f64) -> Self {
        Self {
            credits: Some(credits),
            ..Self::default()
        }
    }

    pub fn has_usage(&self) -> bool {
        self.input_tokens > 0 || self.output_tokens > 0 || self.cached_tokens > 0
    }

    /// Accumulate usage from another LLM call.
    pub fn add(&mut self, other: &UsageSummary) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Cost of one run in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub llm_cost: f64,
    pub browser_cost: f64,
    pub total_cost: f64,
}

impl CostBreakdown {
    pub fn new(llm_cost: f64, browser_cost: f64) -> Self {
        Self {
            llm_cost,
            browser_cost,
            total_cost: llm_cost + browser_cost,
        }
    }
}

/// Get pricing for a model. Returns None if the model is unknown.
pub fn pricing_for_model(model: &str) -> Option<ModelPricing> {
    match model.trim() {
        "bu-1.0" | "browser-use/bu-1.0" => Some(ModelPricing::new(0.50, 3.00, 0.10)),
        "google/gemini-2.5-flash" => Some(ModelPricing::new(0.30, 2.50, 0.03)),
        "google/gemini-2.5-pro" => Some(ModelPricing::new(1.25, 10.00, 0.3125)),
        "openai/gpt-4.1" => Some(ModelPricing::new(2.00, 8.00, 0.50)),
        "anthropic/claude-4.5-haiku" => Some(ModelPricing::new(1.00, 5.00, 0.10)),
        _ => None,
    }
}

/// Token cost in USD. Unknown models fall back to [`DEFAULT_PRICING`].
pub fn llm_cost(model: &str, usage: &UsageSummary) -> f64 {
    if !usage.has_usage() {
        return 0.0;
    }

    let pricing = pricing_for_model(model).unwrap_or_else(|| {
        tracing::debug!(model = %model, "Unknown model for cost calculation, using default pricing");
        DEFAULT_PRICING
    });

    (usage.input_tokens as f64 * pricing.input_per_million
        + usage.output_tokens as f64 * pricing.output_per_million
        + usage.cached_tokens as f64 * pricing.cached_per_million)
        / 1_000_000.0
}

/// Token cost, unless the provider already reported a non-zero total.
pub fn llm_cost_or_reported(model: &str, usage: &UsageSummary, reported_total: Option<f64>) -> f64 {
    match reported_total {
        Some(total) if total > 0.0 => total,
        _ => llm_cost(model, usage),
    }
}

/// Browser time cost in USD.
pub fn browser_cost(duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    duration_secs / 3600.0 * BROWSER_COST_PER_HOUR
}

/// Cost of provider credits in USD.
pub fn credits_cost(credits: f64) -> f64 {
    credits.max(0.0) * USD_PER_CREDIT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pricing_for_known_models() {
        assert!(pricing_for_model("google/gemini-2.5-flash").is_some());
        assert!(pricing_for_model("openai/gpt-4.1").is_some());
        assert!(pricing_for_model("unknown/model").is_none());
    }

    #[test]
    fn test_house_model_is_priced() {
        let (_, model) = crate::providers::parse_provider_model(None);
        let bare = pricing_for_model(&model).expect("house model is priced");
        assert_eq!(pricing_for_model("browser-use/bu-1.0"), Some(bare));

        let usage = UsageSummary::new(1_000_000, 0, 0);
        assert!(approx(llm_cost(&model, &usage), 0.50));
    }

    #[test]
    fn test_llm_cost_uses_table() {
        // gpt-4.1: $2/1M in, $8/1M out, $0.5/1M cached
        let usage = UsageSummary::new(1_000_000, 500_000, 200_000);
        assert!(approx(llm_cost("openai/gpt-4.1", &usage), 2.0 + 4.0 + 0.1));
    }

    #[test]
    fn test_llm_cost_unknown_model_uses_default() {
        let usage = UsageSummary::new(17_920, 433, 0);
        let expected = (17_920.0 * 0.5 + 433.0 * 3.0) / 1_000_000.0;
        assert!(approx(llm_cost("mystery/model", &usage), expected));
    }

    #[test]
    fn test_reported_cost_wins_when_positive() {
        let usage = UsageSummary::new(1000, 1000, 0);
        assert!(approx(llm_cost_or_reported("openai/gpt-4.1", &usage, Some(0.42)), 0.42));
        assert!(approx(
            llm_cost_or_reported("openai/gpt-4.1", &usage, Some(0.0)),
            llm_cost("openai/gpt-4.1", &usage)
        ));
    }

    #[test]
    fn test_browser_and_credit_cost() {
        assert!(approx(browser_cost(1800.0), 0.1));
        assert!(approx(browser_cost(-1.0), 0.0));
        assert!(approx(credits_cost(10.0), 0.1));
    }

    #[test]
    fn test_breakdown_total_is_sum() {
        let cost = CostBreakdown::new(0.1, 0.05);
        assert!(approx(cost.total_cost, 0.15));
    }
}
