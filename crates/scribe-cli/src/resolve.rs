//! Project argument resolution.
//!
//! Commands accept either a project UUID or a project name. A string that
//! parses as a UUID is always treated as an ID.

use anyhow::{Context, Result};
use uuid::Uuid;

use scribe_core::project::ProjectManager;
use scribe_db::models::Project;

/// Resolve `input` to a stored project.
pub async fn resolve_project(projects: &ProjectManager, input: &str) -> Result<Project> {
    let input = input.trim();
    let project = match Uuid::parse_str(input) {
        Ok(id) => projects.get(id).await,
        Err(_) => projects.get_by_name(input).await,
    };
    project.with_context(|| format!("project {input:?} not found (expected a UUID or a project name)"))
}
