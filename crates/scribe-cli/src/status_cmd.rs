//! `scribe status` and `scribe resume`: where a project stands and what
//! to do next.

use std::fmt::Write as _;

use anyhow::Result;

use scribe_core::project::{NextStep, ProjectManager, ResumeState};
use scribe_db::models::SectionStatus;

use crate::TIMESTAMP;
use crate::project_cmds::render_project_table;
use crate::resolve::resolve_project;

/// Run the status command.
///
/// With a project, shows its progress. Without, lists every visible
/// project with its progress.
pub async fn run_status(projects: &ProjectManager, project: Option<&str>) -> Result<()> {
    let Some(input) = project else {
        let rows = projects.list(None).await?;
        if rows.is_empty() {
            println!("No projects found.");
            return Ok(());
        }
        let mut progress = Vec::with_capacity(rows.len());
        for p in &rows {
            progress.push(projects.progress(p.id).await?.percentage);
        }
        print!("{}", render_project_table(&rows, &progress));
        return Ok(());
    };

    let project = resolve_project(projects, input).await?;
    let progress = projects.progress(project.id).await?;
    let latest = projects.latest_milestone(project.id).await?;

    println!("Project: {} ({})", project.name, project.id);
    println!("Status: {}", project.status);
    println!(
        "Progress: {:.1}% ({}/{} milestones, {}/{} sections)",
        progress.percentage,
        progress.milestones_reached,
        progress.milestones_total,
        progress.sections_completed,
        progress.sections_total,
    );
    match latest {
        Some(m) => println!(
            "Latest milestone: {} at {}",
            m.milestone_type,
            m.created_at.format(TIMESTAMP)
        ),
        None => println!("Latest milestone: (none)"),
    }
    Ok(())
}

/// Run the resume command.
pub async fn run_resume(projects: &ProjectManager, input: &str) -> Result<()> {
    let project = resolve_project(projects, input).await?;
    let state = projects.resume(project.id).await?;
    print!("{}", render_resume(&state));
    Ok(())
}

fn hint(step: NextStep) -> &'static str {
    match step {
        NextStep::UploadFiles => "upload source files, then record files_uploaded",
        NextStep::GenerateOutline => "generate the outline, then record outline_generated",
        NextStep::GenerateDraft => "run the draft stage over the outline's sections",
        NextStep::RefineBlog => "run the refine stage over the compiled draft",
        NextStep::GenerateSocial => "run the distribution stage over the refined blog",
        NextStep::Completed => "nothing left to do",
    }
}

pub fn render_resume(state: &ResumeState) -> String {
    let mut out = String::new();
    let project = &state.project;
    let _ = writeln!(out, "Resuming {} ({})", project.name, project.id);
    let _ = writeln!(out, "Progress: {:.1}%", state.progress.percentage);
    let _ = writeln!(out, "Next step: {} ({})", state.next_step, hint(state.next_step));
    let _ = writeln!(out);

    let reached: Vec<&str> = state
        .milestones
        .iter()
        .map(|m| m.milestone_type.as_str())
        .collect();
    let _ = writeln!(
        out,
        "Milestones: {}",
        if reached.is_empty() {
            "(none)".to_owned()
        } else {
            reached.join(", ")
        }
    );

    let unfinished: Vec<String> = state
        .sections
        .iter()
        .filter(|s| s.status != SectionStatus::Completed)
        .map(|s| format!("{}. {} ({})", s.section_index, s.title, s.status))
        .collect();
    if !unfinished.is_empty() {
        let _ = writeln!(out, "Unfinished sections:");
        for line in &unfinished {
            let _ = writeln!(out, "  {line}");
        }
    }

    let cost = &state.cost_summary;
    let _ = writeln!(
        out,
        "Cost so far: ${:.4} over {} calls ({} in / {} out tokens)",
        cost.total_cost, cost.total_calls, cost.total_input_tokens, cost.total_output_tokens
    );
    if let Some(blog) = &state.completed_blog {
        let _ = writeln!(
            out,
            "Completed blog: {:?} v{}, {} words",
            blog.title, blog.version, blog.word_count
        );
    }
    out
}
