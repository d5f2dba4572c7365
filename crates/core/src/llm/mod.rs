pub mod azure_openai;
pub mod json;
pub mod usage;

use crate::domain::portfolio::Portfolio;
use crate::domain::recommendation::Review;
use crate::error::ReviewError;
use crate::llm::usage::TokenUsage;

#[derive(Debug, Clone)]
pub struct GenerateInput {
    pub as_of_date: chrono::NaiveDate,
    pub portfolio: Portfolio,
    /// Free-text description of what kind of ideas the review should look for.
    pub focus: String,
    /// How many not-yet-held symbols to suggest.
    pub new_ideas: u32,
}

impl GenerateInput {
    pub fn try_new(
        as_of_date: chrono::NaiveDate,
        portfolio: Portfolio,
        focus: impl Into<String>,
        new_ideas: u32,
    ) -> anyhow::Result<Self> {
        if portfolio.is_empty() {
            return Err(ReviewError::configuration(
                "cannot request a review for an empty portfolio",
            )
            .into());
        }
        Ok(Self {
            as_of_date,
            portfolio,
            focus: focus.into(),
            new_ideas,
        })
    }

    pub fn portfolio_tsv(&self) -> String {
        self.portfolio.to_tsv()
    }
}

/// A validated review plus what it cost to produce.
#[derive(Debug, Clone)]
pub struct Generation {
    pub review: Review,
    pub usage: TokenUsage,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &'static str;

    /// One recommendation per holding, in portfolio order, or an error for the whole batch.
    async fn generate_review(&self, input: GenerateInput) -> anyhow::Result<Generation>;
}
