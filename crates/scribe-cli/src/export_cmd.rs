use anyhow::Context;

use scribe_core::project::{ExportFormat, ProjectManager};

use crate::resolve::resolve_project;

/// Export a project as JSON or markdown, to stdout or `output`.
pub async fn run_export(
    projects: &ProjectManager,
    input: &str,
    format: &str,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let format: ExportFormat = format.parse()?;
    let project = resolve_project(projects, input).await?;
    let rendered = projects.export(project.id, format).await?;

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("cannot write output file: {path}"))?;
            println!("Exported {} as {format} to {path}", project.name);
        }
        None => {
            print!("{rendered}");
            if !rendered.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}
