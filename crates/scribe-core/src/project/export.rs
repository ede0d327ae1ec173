//! Export renderings of a project's resume state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use scribe_db::models::MilestoneType;

use super::ResumeState;
use crate::error::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// The full resume state as pretty-printed JSON.
    Json,
    /// A header plus the newest textual payload.
    Markdown,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Markdown => "markdown",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            _ => Err(WorkflowError::UnsupportedExportFormat(s.to_owned())),
        }
    }
}

pub(super) fn render(state: &ResumeState, format: ExportFormat) -> WorkflowResult<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(state).map_err(|source| WorkflowError::Serialization {
                what: "resume state",
                source,
            })
        }
        ExportFormat::Markdown => Ok(render_markdown(state)),
    }
}

fn render_markdown(state: &ResumeState) -> String {
    let project = &state.project;
    let mut out = format!(
        "# {}\n\n**Project ID**: {}\n\n**Created**: {}\n\n**Status**: {}\n\n",
        project.name,
        project.id,
        project.created_at.to_rfc3339(),
        project.status,
    );
    if let Some(body) = textual_payload(state) {
        out.push('\n');
        out.push_str(&body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

/// Text of the furthest milestone that carries one: refined blog, then
/// compiled draft, then the outline's section list.
fn textual_payload(state: &ResumeState) -> Option<String> {
    let data = |ty: MilestoneType| {
        state
            .milestones
            .iter()
            .find(|m| m.milestone_type == ty)
            .map(|m| &m.data)
    };
    let text_field = |ty: MilestoneType, field: &str| {
        data(ty)
            .and_then(|d| d.get(field))
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    };

    if data(MilestoneType::BlogRefined).is_some() {
        return text_field(MilestoneType::BlogRefined, "refined_content");
    }
    if data(MilestoneType::DraftCompleted).is_some() {
        return text_field(MilestoneType::DraftCompleted, "compiled_blog");
    }

    let outline = data(MilestoneType::OutlineGenerated)?;
    let mut text = String::from("## Outline\n\n");
    if let Some(title) = outline.get("title").and_then(|v| v.as_str()) {
        text.push_str(&format!("**{title}**\n\n"));
    }
    let sections = outline
        .get("sections")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for section in sections {
        if let Some(title) = section.get("title").and_then(|v| v.as_str()) {
            text.push_str(&format!("- {title}\n"));
        }
    }
    Some(text)
}
