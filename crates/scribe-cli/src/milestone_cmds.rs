//! CLI handlers for `scribe milestone` subcommands.

use std::fmt::Write as _;

use anyhow::{Context, Result, bail};

use scribe_core::project::ProjectManager;
use scribe_db::models::{Milestone, MilestoneType};
use scribe_db::queries::milestones;

use crate::project_cmds::parse_json_object;
use crate::resolve::resolve_project;
use crate::{MilestoneCommands, TIMESTAMP};

pub async fn run_milestone_command(
    command: MilestoneCommands,
    projects: &ProjectManager,
) -> Result<()> {
    match command {
        MilestoneCommands::Save {
            project,
            kind,
            data,
            file,
            metadata,
        } => {
            let project = resolve_project(projects, &project).await?;
            let kind = parse_kind(&kind)?;
            let data = read_payload(data.as_deref(), file.as_deref())?;
            let metadata = match metadata {
                Some(raw) => parse_json_object(&raw, "--metadata")?,
                None => serde_json::json!({}),
            };
            let saved = projects
                .save_milestone(project.id, kind, data, metadata)
                .await?;
            println!(
                "Milestone {} recorded for {} (#{}).",
                saved.milestone_type, project.name, saved.id
            );
            Ok(())
        }
        MilestoneCommands::Show {
            project,
            kind,
            history,
        } => {
            let project = resolve_project(projects, &project).await?;
            let pool = projects.store().pool();
            if history {
                let rows = milestones::list_milestone_history(pool, project.id).await?;
                print!("{}", render_milestone_list(&rows));
                return Ok(());
            }
            match kind {
                Some(kind) => {
                    let kind = parse_kind(&kind)?;
                    let milestone = projects
                        .load_milestone(project.id, kind)
                        .await?
                        .with_context(|| format!("{} has no {kind} milestone", project.name))?;
                    print!("{}", render_milestone(&milestone)?);
                }
                None => {
                    let rows = projects.store().latest_milestones(project.id).await?;
                    print!("{}", render_milestone_list(&rows));
                }
            }
            Ok(())
        }
    }
}

fn parse_kind(input: &str) -> Result<MilestoneType> {
    input.parse::<MilestoneType>().with_context(|| {
        let known: Vec<&str> = MilestoneType::ALL.iter().map(|m| m.as_str()).collect();
        format!("unknown milestone type (expected one of: {})", known.join(", "))
    })
}

/// Milestone payload from `--data` or `--file`; `{}` when neither is given.
fn read_payload(data: Option<&str>, file: Option<&str>) -> Result<serde_json::Value> {
    let raw = match (data, file) {
        (Some(_), Some(_)) => bail!("pass either --data or --file, not both"),
        (Some(inline), None) => inline.to_owned(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read milestone data from {path}"))?,
        (None, None) => return Ok(serde_json::json!({})),
    };
    serde_json::from_str(&raw).context("milestone data is not valid JSON")
}

fn render_milestone(milestone: &Milestone) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Milestone: {} (#{})",
        milestone.milestone_type, milestone.id
    );
    let _ = writeln!(out, "Recorded: {}", milestone.created_at.format(TIMESTAMP));
    if milestone.metadata.as_object().is_some_and(|m| !m.is_empty()) {
        let _ = writeln!(out, "Metadata: {}", milestone.metadata);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", serde_json::to_string_pretty(&milestone.data)?);
    Ok(out)
}

fn render_milestone_list(rows: &[Milestone]) -> String {
    if rows.is_empty() {
        return "No milestones recorded.\n".to_owned();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:>6}  {:<18}  {:<23}  {:>6}", "#", "TYPE", "RECORDED", "KEYS");
    let _ = writeln!(out, "{}", "-".repeat(59));
    for m in rows {
        let keys = m.data.as_object().map_or(0, |o| o.len());
        let _ = writeln!(
            out,
            "{:>6}  {:<18}  {:<23}  {:>6}",
            m.id,
            m.milestone_type.as_str(),
            m.created_at.format(TIMESTAMP).to_string(),
            keys
        );
    }
    out
}
