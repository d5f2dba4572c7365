use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub usage: TokenUsage,
    pub total_usd: f64,
}

impl TokenUsage {
    pub fn estimate(self, pricing: Pricing) -> CostEstimate {
        let input = self.prompt_tokens as f64 * pricing.input_per_1k / 1000.0;
        let output = self.completion_tokens as f64 * pricing.output_per_1k / 1000.0;
        CostEstimate {
            usage: self,
            total_usd: ((input + output) * 10_000.0).round() / 10_000.0,
        }
    }
}
