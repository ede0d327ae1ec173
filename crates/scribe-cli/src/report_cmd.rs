//! `scribe cost` command: cost and token report for a project.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::Result;

use scribe_core::cost::{CostShare, CostSummary, TimelinePoint, cost_timeline};
use scribe_core::project::ProjectManager;
use scribe_db::queries::cost_records;

use crate::resolve::resolve_project;

/// Run the cost report.
pub async fn run_cost_report(
    projects: &ProjectManager,
    input: &str,
    top: usize,
    timeline: bool,
) -> Result<()> {
    let project = resolve_project(projects, input).await?;
    let summary = projects.cost_summary(project.id, top).await?;

    println!("Project: {} ({})", project.name, project.id);
    print!("{}", render_summary(&summary));

    if timeline {
        let records = cost_records::list_cost_records(projects.store().pool(), project.id).await?;
        println!();
        print!("{}", render_timeline(&cost_timeline(&records)));
    }
    Ok(())
}

fn render_shares(out: &mut String, title: &str, shares: &BTreeMap<String, CostShare>) {
    if shares.is_empty() {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<30} {:>10} {:>7} {:>6}", title, "COST", "SHARE", "CALLS");
    let _ = writeln!(out, "{}", "-".repeat(56));
    let mut sorted: Vec<_> = shares.iter().collect();
    sorted.sort_by(|a, b| b.1.cost.total_cmp(&a.1.cost));
    for (key, share) in sorted {
        let _ = writeln!(
            out,
            "{:<30} {:>10.4} {:>6.2}% {:>6}",
            key, share.cost, share.percentage, share.calls
        );
    }
}

pub fn render_summary(summary: &CostSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Total cost: ${:.4}", summary.total_cost);
    let _ = writeln!(out, "Calls:      {}", summary.total_calls);
    let _ = writeln!(out, "Avg/call:   ${:.4}", summary.average_cost_per_call);
    let _ = writeln!(out, "Tokens:");
    let _ = writeln!(out, "  Input:    {}", summary.total_input_tokens);
    let _ = writeln!(out, "  Output:   {}", summary.total_output_tokens);
    let _ = writeln!(
        out,
        "  Total:    {}",
        summary.total_input_tokens + summary.total_output_tokens
    );
    if summary.total_calls == 0 {
        return out;
    }

    render_shares(&mut out, "AGENT", &summary.by_agent);
    render_shares(&mut out, "STAGE", &summary.by_stage);

    if !summary.top_nodes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Most expensive nodes:");
        for (rank, node) in summary.top_nodes.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} ${:.4} ({} calls)",
                rank + 1,
                node.node,
                node.cost,
                node.calls
            );
        }
    }

    if !summary.iteration_costs.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Refinement iterations:");
        for (node, it) in &summary.iteration_costs {
            let _ = writeln!(
                out,
                "  {node}: {} iterations, ${:.4} total, ${:.4}/iteration",
                it.iterations, it.total_cost, it.average_cost_per_iteration
            );
        }
    }
    out
}

fn render_timeline(points: &[TimelinePoint]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<20} {:<24} {:>10} {:>12}",
        "AT", "CALL", "COST", "CUMULATIVE"
    );
    let _ = writeln!(out, "{}", "-".repeat(69));
    for p in points {
        let call = format!("{}.{}", p.agent, p.operation);
        let _ = writeln!(
            out,
            "{:<20} {:<24} {:>10.4} {:>12.4}",
            p.at.format("%Y-%m-%d %H:%M:%S").to_string(),
            call,
            p.cost,
            p.cumulative_cost
        );
    }
    out
}
