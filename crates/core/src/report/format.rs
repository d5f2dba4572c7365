use crate::domain::recommendation::{Action, Recommendation};
use crate::report::Report;
use std::fmt::Write;

pub fn subject(report: &Report) -> String {
    format!("Daily portfolio review - {}", report.as_of_date)
}

/// Plain-text body: one `SYMBOL: action` line per holding, in portfolio order.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", subject(report));
    out.push('\n');

    for rec in &report.recommendations {
        let _ = write!(out, "{}: {}", rec.symbol(), rec.action);
        if let Some(reason) = &rec.rationale {
            let _ = write!(out, " - {reason}");
        }
        out.push('\n');
    }

    if !report.new_ideas.is_empty() {
        out.push_str("\nNew ideas:\n");
        for idea in &report.new_ideas {
            let _ = write!(out, "{}: buy", idea.symbol);
            if let Some(reason) = &idea.reason {
                let _ = write!(out, " - {reason}");
            }
            out.push('\n');
        }
    }

    if let Some(summary) = &report.summary {
        let _ = writeln!(out, "\nNotes: {summary}");
    }

    out.push('\n');
    if let Some(cost) = &report.cost {
        let _ = writeln!(
            out,
            "Tokens: prompt={}, completion={}, estimated cost ${:.4}",
            cost.usage.prompt_tokens, cost.usage.completion_tokens, cost.total_usd
        );
    }
    let _ = writeln!(out, "Run mode: {}", report.run_mode);
    out
}

pub fn render_html(report: &Report) -> String {
    let mut html: Vec<String> = Vec::new();
    html.push("<h2>📌 Today's recommendations</h2>".to_string());

    let section = |html: &mut Vec<String>, label: &str, color: &str, items: Vec<String>| {
        if items.is_empty() {
            return;
        }
        html.push(format!("<h3 style='color:{color}'>{label}</h3>"));
        html.push("<ul>".to_string());
        html.extend(items.into_iter().map(|item| format!("<li>{item}</li>")));
        html.push("</ul>".to_string());
    };

    let by_action = |action: Action| -> Vec<String> {
        report
            .recommendations
            .iter()
            .filter(|r| r.action == action)
            .map(|r| entry(r.company.as_deref(), r.symbol(), r.rationale.as_deref()))
            .collect()
    };
    let new_ideas: Vec<String> = report
        .new_ideas
        .iter()
        .map(|i| entry(i.company.as_deref(), &i.symbol, i.reason.as_deref()))
        .collect();

    section(&mut html, "✅ Add to position", "green", by_action(Action::Buy));
    section(&mut html, "✅ New purchase", "green", new_ideas);
    section(&mut html, "❌ Sell", "red", by_action(Action::Sell));
    section(&mut html, "🕒 Hold", "gray", by_action(Action::Hold));

    let analysed: Vec<&Recommendation> = report
        .recommendations
        .iter()
        .filter(|r| !r.highlights.is_empty())
        .collect();
    if !analysed.is_empty() {
        html.push("<hr><h2>📊 Holdings analysis</h2>".to_string());
        for rec in analysed {
            html.push(format!("<h3>{}</h3>", name(rec.company.as_deref(), rec.symbol())));
            html.push("<ul>".to_string());
            for point in &rec.highlights {
                html.push(format!("<li>{}</li>", escape_html(point)));
            }
            html.push("</ul>".to_string());
        }
    }

    if let Some(summary) = &report.summary {
        html.push(format!(
            "<hr><p style='color:gray;font-size:small'>{}</p>",
            escape_html(summary)
        ));
    }

    let mut footer = String::from("<hr><p style='font-size:small;color:gray'>");
    if let Some(cost) = &report.cost {
        let _ = write!(
            footer,
            "🔍 Used {} prompt tokens, {} completion tokens.<br>💸 Estimated cost: <b>${:.4}</b>.<br>",
            cost.usage.prompt_tokens, cost.usage.completion_tokens, cost.total_usd
        );
    }
    let _ = write!(footer, "{}</p>", escape_html(&report.run_mode));
    html.push(footer);

    html.join("\n")
}

fn name(company: Option<&str>, symbol: &str) -> String {
    match company {
        Some(company) => format!(
            "<b>{}</b> <i>({})</i>",
            escape_html(company),
            escape_html(symbol)
        ),
        None => format!("<b>{}</b>", escape_html(symbol)),
    }
}

fn entry(company: Option<&str>, symbol: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("{} &mdash; {}", name(company, symbol), escape_html(reason)),
        None => name(company, symbol),
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
