use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    pub cost_basis: Option<f64>,
    /// Input columns other than symbol/quantity/cost basis, kept verbatim for the prompt.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Holding {
    pub fn new(symbol: impl Into<String>, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            cost_basis: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_cost_basis(mut self, cost_basis: f64) -> Self {
        self.cost_basis = Some(cost_basis);
        self
    }

    /// Key used to match model output against holdings.
    pub fn symbol_key(&self) -> String {
        symbol_key(&self.symbol)
    }
}

pub fn symbol_key(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    /// Extra column names in input order.
    #[serde(default)]
    pub extra_columns: Vec<String>,
}

impl Portfolio {
    pub fn new(holdings: Vec<Holding>) -> Self {
        Self {
            holdings,
            extra_columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Re-serializes the portfolio as TSV for the model prompt.
    pub fn to_tsv(&self) -> String {
        let mut header = vec!["symbol", "quantity", "cost_basis"];
        header.extend(self.extra_columns.iter().map(String::as_str));

        let mut lines = Vec::with_capacity(self.holdings.len() + 1);
        lines.push(header.join("\t"));
        for h in &self.holdings {
            let mut row = vec![
                h.symbol.clone(),
                format_number(h.quantity),
                h.cost_basis.map(format_number).unwrap_or_default(),
            ];
            for col in &self.extra_columns {
                row.push(h.extra.get(col).cloned().unwrap_or_default());
            }
            lines.push(row.join("\t"));
        }
        lines.join("\n")
    }
}

fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}
