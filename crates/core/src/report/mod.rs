pub mod format;

use crate::domain::recommendation::{NewIdea, Recommendation, Review};
use crate::llm::usage::CostEstimate;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Everything one invocation reports on. Lives only for the duration of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub as_of_date: NaiveDate,
    pub recommendations: Vec<Recommendation>,
    pub new_ideas: Vec<NewIdea>,
    pub summary: Option<String>,
    pub cost: Option<CostEstimate>,
    pub run_mode: String,
}

impl Report {
    pub fn from_review(
        as_of_date: NaiveDate,
        review: Review,
        cost: Option<CostEstimate>,
        run_mode: impl Into<String>,
    ) -> Self {
        Self {
            as_of_date,
            recommendations: review.recommendations,
            new_ideas: review.new_ideas,
            summary: review.notes,
            cost,
            run_mode: run_mode.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReport {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn render(report: &Report) -> RenderedReport {
    RenderedReport {
        subject: format::subject(report),
        text: format::render_text(report),
        html: format::render_html(report),
    }
}
