//! CLI handlers for `scribe project` subcommands.
//!
//! Implements:
//! - `scribe project create <name>`          -- register a new project
//! - `scribe project list [--status]`        -- table of projects
//! - `scribe project show <project>`         -- details, milestones, sections
//! - `scribe project archive <project>`
//! - `scribe project delete <project> [--permanent]`
//! - `scribe project meta <project> <json>`  -- merge into metadata

use std::fmt::Write as _;

use anyhow::{Context, Result, bail};

use scribe_core::project::{ProjectManager, ResumeState};
use scribe_db::models::{Project, ProjectStatus};

use crate::ProjectCommands;
use crate::TIMESTAMP;
use crate::resolve::resolve_project;

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

pub async fn run_project_command(
    command: ProjectCommands,
    projects: &ProjectManager,
) -> Result<()> {
    match command {
        ProjectCommands::Create { name, metadata } => {
            cmd_create(projects, &name, metadata.as_deref()).await
        }
        ProjectCommands::List { status } => cmd_list(projects, status.as_deref()).await,
        ProjectCommands::Show { project } => cmd_show(projects, &project).await,
        ProjectCommands::Archive { project } => {
            let project = resolve_project(projects, &project).await?;
            let archived = projects.archive(project.id).await?;
            println!("Project {} ({}) archived.", archived.name, archived.id);
            Ok(())
        }
        ProjectCommands::Delete { project, permanent } => {
            let project = resolve_project(projects, &project).await?;
            projects.delete(project.id, permanent).await?;
            if permanent {
                println!("Project {} ({}) permanently deleted.", project.name, project.id);
            } else {
                println!("Project {} ({}) deleted.", project.name, project.id);
            }
            Ok(())
        }
        ProjectCommands::Meta { project, patch } => {
            let project = resolve_project(projects, &project).await?;
            let patch = parse_json_object(&patch, "metadata patch")?;
            let updated = projects.update_metadata(project.id, &patch).await?;
            println!("{}", serde_json::to_string_pretty(&updated.metadata)?);
            Ok(())
        }
    }
}

/// Parse a JSON argument that has to be an object.
pub fn parse_json_object(input: &str, what: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_str(input).with_context(|| format!("{what} is not valid JSON"))?;
    if !value.is_object() {
        bail!("{what} must be a JSON object, got {value}");
    }
    Ok(value)
}

// -----------------------------------------------------------------------
// scribe project create <name>
// -----------------------------------------------------------------------

async fn cmd_create(projects: &ProjectManager, name: &str, metadata: Option<&str>) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("project name must not be empty");
    }
    let metadata = match metadata {
        Some(raw) => parse_json_object(raw, "--metadata")?,
        None => serde_json::json!({}),
    };

    let id = projects.create(name, metadata).await?;

    println!("Project created.");
    println!();
    println!("  Project ID: {id}");
    println!("  Name:       {name}");
    println!();
    println!("Next: `scribe milestone save {name} files_uploaded --data '{{...}}'`");
    Ok(())
}

// -----------------------------------------------------------------------
// scribe project list
// -----------------------------------------------------------------------

async fn cmd_list(projects: &ProjectManager, status: Option<&str>) -> Result<()> {
    let status = status
        .map(|s| s.parse::<ProjectStatus>())
        .transpose()
        .context("invalid --status (expected active, archived or deleted)")?;
    let rows = projects.list(status).await?;

    if rows.is_empty() {
        println!("No projects found. Use `scribe project create <name>` to create one.");
        return Ok(());
    }

    let mut progress = Vec::with_capacity(rows.len());
    for project in &rows {
        progress.push(projects.progress(project.id).await?.percentage);
    }
    print!("{}", render_project_table(&rows, &progress));
    Ok(())
}

/// Fixed-width table of projects with their progress percentages.
pub fn render_project_table(rows: &[Project], progress: &[f64]) -> String {
    let name_w = rows.iter().map(|p| p.name.len()).max().unwrap_or(4).max(4);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<36}  {:<name_w$}  {:<8}  {:>8}  {}",
        "ID", "NAME", "STATUS", "PROGRESS", "UPDATED"
    );
    let _ = writeln!(out, "{}", "-".repeat(36 + name_w + 8 + 8 + 16 + 8));
    for (project, pct) in rows.iter().zip(progress) {
        let _ = writeln!(
            out,
            "{:<36}  {:<name_w$}  {:<8}  {:>7.1}%  {}",
            project.id,
            project.name,
            project.status.to_string(),
            pct,
            project.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
    out
}

// -----------------------------------------------------------------------
// scribe project show <project>
// -----------------------------------------------------------------------

async fn cmd_show(projects: &ProjectManager, input: &str) -> Result<()> {
    let project = resolve_project(projects, input).await?;
    let state = projects.resume(project.id).await?;
    print!("{}", render_project_details(&state));
    Ok(())
}

pub fn render_project_details(state: &ResumeState) -> String {
    let project = &state.project;
    let mut out = String::new();
    let _ = writeln!(out, "Project: {} ({})", project.name, project.id);
    let _ = writeln!(out, "Status: {}", project.status);
    let _ = writeln!(out, "Created: {}", project.created_at.format(TIMESTAMP));
    if let Some(archived_at) = project.archived_at {
        let _ = writeln!(out, "Archived: {}", archived_at.format(TIMESTAMP));
    }
    if let Some(completed_at) = project.completed_at {
        let _ = writeln!(out, "Completed: {}", completed_at.format(TIMESTAMP));
    }
    if project.metadata.as_object().is_some_and(|m| !m.is_empty()) {
        let _ = writeln!(out, "Metadata: {}", project.metadata);
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Milestones ({}/{}):",
        state.progress.milestones_reached, state.progress.milestones_total
    );
    if state.milestones.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for milestone in &state.milestones {
        let _ = writeln!(
            out,
            "  [+] {:<18} {}",
            milestone.milestone_type.as_str(),
            milestone.created_at.format(TIMESTAMP)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Sections ({}/{} completed):",
        state.progress.sections_completed, state.progress.sections_total
    );
    if state.sections.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for section in &state.sections {
        let icon = match section.status.to_string().as_str() {
            "pending" => ".",
            "generating" => "*",
            "completed" => "+",
            _ => " ",
        };
        let _ = writeln!(
            out,
            "  [{icon}] {:>3}. {} (${:.4})",
            section.section_index, section.title, section.cost_delta
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Progress: {:.1}%", state.progress.percentage);
    let _ = writeln!(out, "Next step: {}", state.next_step);
    out
}
