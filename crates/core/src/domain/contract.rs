use crate::domain::portfolio::{symbol_key, Portfolio};
use crate::domain::recommendation::{Action, NewIdea, Recommendation, Review};
use anyhow::{bail, ensure};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Model output as received. The grouped shape is what the prompt asks for; the flat
/// `{"SYMBOL": "action"}` shape is accepted as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmReview {
    Grouped(LlmGroupedReview),
    Flat(BTreeMap<String, LlmFlatEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmGroupedReview {
    pub recommendations: LlmRecommendationGroups,
    #[serde(default)]
    pub analysis: Vec<LlmAnalysis>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRecommendationGroups {
    #[serde(default)]
    pub buy: Vec<LlmPick>,
    #[serde(default)]
    pub sell: Vec<LlmPick>,
    #[serde(default)]
    pub hold: Vec<LlmPick>,
    #[serde(default, rename = "buy-new", alias = "buy_new")]
    pub buy_new: Vec<LlmPick>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmPick {
    pub symbol: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnalysis {
    pub symbol: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LlmFlatEntry {
    Action(String),
    Detailed {
        action: String,
        #[serde(default, alias = "rationale")]
        reason: Option<String>,
        #[serde(default)]
        company: Option<String>,
    },
}

struct Pick {
    action: Action,
    company: Option<String>,
    reason: Option<String>,
}

impl LlmReview {
    /// Checks the output against the loaded portfolio. The batch is atomic: any holding
    /// without exactly one action rejects the whole review.
    pub fn validate_and_into_review(self, portfolio: &Portfolio) -> anyhow::Result<Review> {
        ensure!(!portfolio.is_empty(), "cannot validate a review for an empty portfolio");

        let index: HashMap<String, usize> = portfolio
            .holdings
            .iter()
            .enumerate()
            .map(|(i, h)| (h.symbol_key(), i))
            .collect();
        let mut picks: Vec<Option<Pick>> = portfolio.holdings.iter().map(|_| None).collect();

        let mut new_ideas = Vec::new();
        let mut highlights: HashMap<usize, (Option<String>, Vec<String>)> = HashMap::new();
        let mut notes = None;

        match self {
            LlmReview::Grouped(grouped) => {
                let groups = grouped.recommendations;
                for (action, bucket) in [
                    (Action::Buy, groups.buy),
                    (Action::Sell, groups.sell),
                    (Action::Hold, groups.hold),
                ] {
                    for pick in bucket {
                        let key = symbol_key(&pick.symbol);
                        let Some(&i) = index.get(&key) else {
                            tracing::warn!(
                                symbol = %pick.symbol,
                                %action,
                                "model recommended a symbol that is not held; ignoring"
                            );
                            continue;
                        };
                        place(
                            &mut picks[i],
                            &portfolio.holdings[i].symbol,
                            Pick {
                                action,
                                company: clean(pick.company),
                                reason: clean(pick.reason),
                            },
                        )?;
                    }
                }

                let mut seen_new = HashSet::new();
                for pick in groups.buy_new {
                    let key = symbol_key(&pick.symbol);
                    if key.is_empty() {
                        continue;
                    }
                    if index.contains_key(&key) {
                        tracing::warn!(
                            symbol = %pick.symbol,
                            "buy-new entry is already held; ignoring"
                        );
                        continue;
                    }
                    if !seen_new.insert(key.clone()) {
                        continue;
                    }
                    new_ideas.push(NewIdea {
                        symbol: key,
                        company: clean(pick.company),
                        reason: clean(pick.reason),
                    });
                }

                for analysis in grouped.analysis {
                    if let Some(&i) = index.get(&symbol_key(&analysis.symbol)) {
                        let points = analysis
                            .highlights
                            .into_iter()
                            .filter_map(|p| clean(Some(p)))
                            .collect();
                        highlights.insert(i, (clean(analysis.company), points));
                    }
                }

                notes = clean(grouped.notes);
            }
            LlmReview::Flat(entries) => {
                for (symbol, entry) in entries {
                    let (raw_action, reason, company) = match entry {
                        LlmFlatEntry::Action(a) => (a, None, None),
                        LlmFlatEntry::Detailed {
                            action,
                            reason,
                            company,
                        } => (action, reason, company),
                    };
                    let Some(&i) = index.get(&symbol_key(&symbol)) else {
                        tracing::warn!(
                            %symbol,
                            action = %raw_action,
                            "model recommended a symbol that is not held; ignoring"
                        );
                        continue;
                    };
                    let Some(action) = Action::parse(&raw_action) else {
                        bail!("unknown action {raw_action:?} for symbol {symbol}");
                    };
                    place(
                        &mut picks[i],
                        &portfolio.holdings[i].symbol,
                        Pick {
                            action,
                            company: clean(company),
                            reason: clean(reason),
                        },
                    )?;
                }
            }
        }

        let missing: Vec<&str> = portfolio
            .holdings
            .iter()
            .zip(&picks)
            .filter(|(_, p)| p.is_none())
            .map(|(h, _)| h.symbol.as_str())
            .collect();
        ensure!(
            missing.is_empty(),
            "model output has no recommendation for: {}",
            missing.join(", ")
        );

        let recommendations = portfolio
            .holdings
            .iter()
            .zip(picks)
            .enumerate()
            .filter_map(|(i, (holding, pick))| {
                let pick = pick?;
                let (analysis_company, points) = highlights.remove(&i).unwrap_or_default();
                Some(Recommendation {
                    holding: holding.clone(),
                    action: pick.action,
                    company: pick.company.or(analysis_company),
                    rationale: pick.reason,
                    highlights: points,
                })
            })
            .collect();

        Ok(Review {
            recommendations,
            new_ideas,
            notes,
        })
    }
}

fn place(slot: &mut Option<Pick>, symbol: &str, pick: Pick) -> anyhow::Result<()> {
    if let Some(existing) = slot {
        bail!(
            "duplicate recommendation for {symbol}: {} and {}",
            existing.action,
            pick.action
        );
    }
    *slot = Some(pick);
    Ok(())
}

fn clean(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Holding;
    use serde_json::json;

    fn portfolio() -> Portfolio {
        Portfolio::new(vec![
            Holding::new("AAPL", 10.0),
            Holding::new("MSFT", 5.0),
            Holding::new("KO", 20.0),
        ])
    }

    fn review(v: serde_json::Value) -> anyhow::Result<Review> {
        let parsed: LlmReview = serde_json::from_value(v)?;
        parsed.validate_and_into_review(&portfolio())
    }

    #[test]
    fn grouped_output_is_reordered_to_portfolio_order() {
        let r = review(json!({
            "recommendations": {
                "buy": [{"symbol": "ko", "company": "Coca-Cola", "reason": "steady dividend"}],
                "sell": [{"symbol": "MSFT", "company": "Microsoft", "reason": "rich valuation"}],
                "hold": [{"symbol": "AAPL", "company": "Apple", "reason": "fair price"}],
                "buy-new": [
                    {"symbol": "PEP", "company": "PepsiCo", "reason": "yield"},
                    {"symbol": "AAPL", "company": "Apple", "reason": "already held"}
                ]
            },
            "analysis": [
                {"symbol": "AAPL", "company": "Apple", "highlights": ["services growth", "  "]}
            ],
            "notes": " neutral sentiment "
        }))
        .unwrap();

        let symbols: Vec<_> = r.recommendations.iter().map(|x| x.symbol()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "KO"]);
        let actions: Vec<_> = r.recommendations.iter().map(|x| x.action).collect();
        assert_eq!(actions, vec![Action::Hold, Action::Sell, Action::Buy]);
        assert_eq!(r.recommendations[0].highlights, vec!["services growth"]);
        assert_eq!(r.new_ideas.len(), 1);
        assert_eq!(r.new_ideas[0].symbol, "PEP");
        assert_eq!(r.notes.as_deref(), Some("neutral sentiment"));
    }

    #[test]
    fn flat_output_accepts_plain_and_detailed_entries() {
        let r = review(json!({
            "AAPL": "HOLD",
            "MSFT": {"action": "sell", "rationale": "trim"},
            "KO": {"action": "buy"},
            "TSLA": "buy"
        }))
        .unwrap();

        assert_eq!(r.recommendations.len(), 3);
        assert_eq!(r.recommendations[1].rationale.as_deref(), Some("trim"));
        assert!(r.new_ideas.is_empty());
    }

    #[test]
    fn flat_output_ignores_unheld_keys_whatever_their_value() {
        let r = review(json!({
            "AAPL": "hold",
            "MSFT": "sell",
            "KO": "buy",
            "TSLA": "strong buy",
            "notes": "markets look calm"
        }))
        .unwrap();

        let symbols: Vec<_> = r.recommendations.iter().map(|x| x.symbol()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "KO"]);
        assert!(r.new_ideas.is_empty());
    }

    #[test]
    fn rejects_missing_holding() {
        let err = review(json!({"AAPL": "hold", "MSFT": "sell"})).unwrap_err();
        assert!(err.to_string().contains("KO"));
    }

    #[test]
    fn rejects_duplicate_holding() {
        let err = review(json!({
            "recommendations": {
                "buy": [{"symbol": "AAPL"}, {"symbol": "MSFT"}, {"symbol": "KO"}],
                "sell": [{"symbol": "AAPL"}]
            }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = review(json!({"AAPL": "hold", "MSFT": "short", "KO": "buy"})).unwrap_err();
        assert!(err.to_string().contains("short"));
    }
}
