//! Progress and next-step derivation. Pure functions over counts.

use std::fmt;

use serde::{Deserialize, Serialize};

use scribe_db::models::MilestoneType;

/// Share of progress carried by milestones; sections carry the rest.
const MILESTONE_WEIGHT: f64 = 50.0;
const SECTION_WEIGHT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: f64,
    pub milestones_reached: usize,
    pub milestones_total: usize,
    pub sections_completed: i64,
    pub sections_total: i64,
}

impl Progress {
    /// `(milestones / 5) * 50 + (completed / total) * 50`, with the section
    /// term `0` while no sections exist.
    pub fn compute(milestones_reached: usize, sections_completed: i64, sections_total: i64) -> Self {
        let milestones_total = MilestoneType::ALL.len();
        let milestone_part =
            milestones_reached.min(milestones_total) as f64 / milestones_total as f64 * MILESTONE_WEIGHT;
        let section_part = if sections_total > 0 {
            sections_completed.clamp(0, sections_total) as f64 / sections_total as f64
                * SECTION_WEIGHT
        } else {
            0.0
        };
        Self {
            percentage: milestone_part + section_part,
            milestones_reached,
            milestones_total,
            sections_completed,
            sections_total,
        }
    }
}

/// The next actionable pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    UploadFiles,
    GenerateOutline,
    GenerateDraft,
    RefineBlog,
    GenerateSocial,
    Completed,
}

impl NextStep {
    /// The step that produces `milestone`.
    pub fn producing(milestone: MilestoneType) -> Self {
        match milestone {
            MilestoneType::FilesUploaded => Self::UploadFiles,
            MilestoneType::OutlineGenerated => Self::GenerateOutline,
            MilestoneType::DraftCompleted => Self::GenerateDraft,
            MilestoneType::BlogRefined => Self::RefineBlog,
            MilestoneType::SocialGenerated => Self::GenerateSocial,
        }
    }

    /// First missing milestone type, in pipeline order, decides the step.
    pub fn from_reached(reached: &[MilestoneType]) -> Self {
        MilestoneType::ALL
            .into_iter()
            .find(|ty| !reached.contains(ty))
            .map_or(Self::Completed, Self::producing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UploadFiles => "upload_files",
            Self::GenerateOutline => "generate_outline",
            Self::GenerateDraft => "generate_draft",
            Self::RefineBlog => "refine_blog",
            Self::GenerateSocial => "generate_social",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
