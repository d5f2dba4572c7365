pub mod blob;
pub mod local;

use crate::config::Settings;
use crate::domain::portfolio::{Holding, Portfolio};
use crate::error::ReviewError;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

const SYMBOL_COLUMNS: &[&str] = &["symbol", "ticker"];
const QUANTITY_COLUMNS: &[&str] = &["quantity", "qty", "shares"];
const COST_BASIS_COLUMNS: &[&str] = &["cost_basis", "cost basis", "costbasis", "avg_price"];

/// Raw portfolio file as fetched from a source.
#[derive(Debug, Clone)]
pub struct PortfolioDocument {
    pub name: String,
    pub content: String,
}

#[async_trait::async_trait]
pub trait PortfolioSource: Send + Sync {
    fn describe(&self) -> String;

    async fn fetch(&self) -> anyhow::Result<PortfolioDocument>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortfolioFormat {
    Tsv,
    Json,
}

impl PortfolioFormat {
    pub fn detect(name: &str, content: &str) -> Self {
        if content.trim_start().starts_with('[') || name.to_ascii_lowercase().ends_with(".json") {
            PortfolioFormat::Json
        } else {
            PortfolioFormat::Tsv
        }
    }
}

/// Picks the local file in development (or when a path is forced), the blob otherwise.
pub fn source_from_settings(
    settings: &Settings,
    path_override: Option<PathBuf>,
) -> anyhow::Result<Box<dyn PortfolioSource>> {
    if let Some(path) = path_override {
        return Ok(Box::new(local::FilePortfolioSource::new(path)));
    }
    if settings.is_development() {
        return Ok(Box::new(local::FilePortfolioSource::new(
            settings.portfolio_path.clone(),
        )));
    }
    Ok(Box::new(blob::BlobPortfolioSource::from_settings(settings)?))
}

pub async fn load_portfolio(source: &dyn PortfolioSource) -> anyhow::Result<Portfolio> {
    let doc = source.fetch().await?;
    let portfolio = parse_portfolio(&doc.name, &doc.content)?;
    tracing::info!(
        source = %source.describe(),
        holdings = portfolio.len(),
        "portfolio loaded"
    );
    Ok(portfolio)
}

pub fn parse_portfolio(name: &str, content: &str) -> anyhow::Result<Portfolio> {
    let portfolio = match PortfolioFormat::detect(name, content) {
        PortfolioFormat::Tsv => parse_tsv(name, content)?,
        PortfolioFormat::Json => parse_json(name, content)?,
    };

    if portfolio.is_empty() {
        return Err(malformed(name, "portfolio has no holdings"));
    }

    let mut seen = HashSet::new();
    for h in &portfolio.holdings {
        if !seen.insert(h.symbol_key()) {
            return Err(malformed(name, format!("duplicate symbol {}", h.symbol)));
        }
    }

    Ok(portfolio)
}

fn parse_tsv(name: &str, content: &str) -> anyhow::Result<Portfolio> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| malformed(name, format!("unreadable header row: {e}")))?
        .clone();

    let find = |aliases: &[&str]| {
        headers
            .iter()
            .position(|h| aliases.iter().any(|a| h.eq_ignore_ascii_case(a)))
    };
    let symbol_idx =
        find(SYMBOL_COLUMNS).ok_or_else(|| malformed(name, "missing required column: symbol"))?;
    let quantity_idx = find(QUANTITY_COLUMNS)
        .ok_or_else(|| malformed(name, "missing required column: quantity"))?;
    let cost_idx = find(COST_BASIS_COLUMNS);

    let extra_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| {
            *i != symbol_idx && *i != quantity_idx && Some(*i) != cost_idx && !h.is_empty()
        })
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut holdings = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let line = row + 2;
        let record = record.map_err(|e| malformed(name, format!("line {line}: {e}")))?;
        let field = |i: usize| record.get(i).unwrap_or("");

        let symbol = field(symbol_idx);
        if symbol.is_empty() {
            return Err(malformed(name, format!("line {line}: empty symbol")));
        }
        let quantity = parse_quantity(field(quantity_idx))
            .map_err(|detail| malformed(name, format!("line {line} ({symbol}): {detail}")))?;
        let cost_basis = match cost_idx.map(field).filter(|s| !s.is_empty()) {
            None => None,
            Some(raw) => Some(parse_number(raw).map_err(|detail| {
                malformed(name, format!("line {line} ({symbol}): cost basis {detail}"))
            })?),
        };

        let extra = extra_columns
            .iter()
            .map(|(i, col)| (col.clone(), field(*i).to_string()))
            .collect();

        holdings.push(Holding {
            symbol: symbol.to_string(),
            quantity,
            cost_basis,
            extra,
        });
    }

    Ok(Portfolio {
        holdings,
        extra_columns: extra_columns.into_iter().map(|(_, c)| c).collect(),
    })
}

fn parse_json(name: &str, content: &str) -> anyhow::Result<Portfolio> {
    let rows: Vec<serde_json::Map<String, Value>> = serde_json::from_str(content)
        .map_err(|e| malformed(name, format!("expected a JSON array of objects: {e}")))?;

    let mut extra_columns: Vec<String> = Vec::new();
    let mut holdings = Vec::with_capacity(rows.len());

    for (i, mut obj) in rows.into_iter().enumerate() {
        let entry = i + 1;
        let symbol = match take_field(&mut obj, SYMBOL_COLUMNS) {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(malformed(name, format!("entry {entry}: missing symbol"))),
        };
        let quantity = match take_field(&mut obj, QUANTITY_COLUMNS) {
            Some(v) => parse_quantity(&value_text(&v)),
            None => Err("missing quantity".to_string()),
        }
        .map_err(|detail| malformed(name, format!("entry {entry} ({symbol}): {detail}")))?;
        let cost_basis = match take_field(&mut obj, COST_BASIS_COLUMNS) {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_number(&value_text(&v)).map_err(|detail| {
                malformed(name, format!("entry {entry} ({symbol}): cost basis {detail}"))
            })?),
        };

        let mut extra = BTreeMap::new();
        for (key, value) in obj {
            if !extra_columns.contains(&key) {
                extra_columns.push(key.clone());
            }
            extra.insert(key, value_text(&value));
        }

        holdings.push(Holding {
            symbol,
            quantity,
            cost_basis,
            extra,
        });
    }

    Ok(Portfolio {
        holdings,
        extra_columns,
    })
}

fn take_field(obj: &mut serde_json::Map<String, Value>, aliases: &[&str]) -> Option<Value> {
    let key = obj
        .keys()
        .find(|k| aliases.iter().any(|a| k.eq_ignore_ascii_case(a)))?
        .clone();
    obj.remove(&key)
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_number(raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("is not a number: {raw:?}")),
    }
}

fn parse_quantity(raw: &str) -> Result<f64, String> {
    let v = parse_number(raw).map_err(|e| format!("quantity {e}"))?;
    if v < 0.0 {
        return Err(format!("quantity must not be negative: {raw}"));
    }
    Ok(v)
}

fn malformed(name: &str, detail: impl std::fmt::Display) -> anyhow::Error {
    ReviewError::configuration(format!("malformed portfolio {name}: {detail}")).into()
}
