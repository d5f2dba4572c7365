use crate::domain::portfolio::Holding;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
            Action::Hold => "hold",
        }
    }

    /// Lenient parse for model output ("HOLD", " sell ").
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Some(Action::Buy),
            "sell" => Some(Action::Sell),
            "hold" => Some(Action::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub holding: Holding,
    pub action: Action,
    pub company: Option<String>,
    pub rationale: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl Recommendation {
    pub fn symbol(&self) -> &str {
        &self.holding.symbol
    }
}

/// A purchase suggestion for a symbol that is not currently held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIdea {
    pub symbol: String,
    pub company: Option<String>,
    pub reason: Option<String>,
}

/// Validated model output for one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub recommendations: Vec<Recommendation>,
    pub new_ideas: Vec<NewIdea>,
    pub notes: Option<String>,
}
