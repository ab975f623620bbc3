use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{BatchResult, ClientSnapshot, Insight, RiskStatus};

/// Dropout-risk clients first, then by id.
pub fn ordered_insights(result: &BatchResult) -> Vec<&Insight> {
    let mut insights: Vec<&Insight> = result.insights.iter().collect();
    insights.sort_by(|a, b| {
        let rank = |i: &Insight| match i.risk_status {
            RiskStatus::Dropout => 0,
            RiskStatus::Committed => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.client_id.cmp(&b.client_id))
    });
    insights
}

pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    clients: &[ClientSnapshot],
    result: &BatchResult,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Client Risk & Insight Report");
    let _ = writeln!(
        output,
        "Generated from {} on {} for {} clients",
        source,
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        clients.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");
    let _ = writeln!(
        output,
        "- dropout: {}",
        result.count_by_status(RiskStatus::Dropout)
    );
    let _ = writeln!(
        output,
        "- committed: {}",
        result.count_by_status(RiskStatus::Committed)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Insights");

    if result.is_empty() {
        let _ = writeln!(output, "No insights were generated for this batch.");
    } else {
        for insight in ordered_insights(result) {
            let _ = writeln!(
                output,
                "- {} ({}): {}",
                insight.client_id, insight.risk_status, insight.message
            );
        }
    }

    let dropped = result.dropped_client_ids(clients);
    if !dropped.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Clients Without Insights");
        let _ = writeln!(output, "{}", dropped.join(", "));
    }

    output
}
