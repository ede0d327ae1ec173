use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
    Deleted,
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

impl FromStr for ProjectStatus {
    type Err = ProjectStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(ProjectStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ProjectStatus`] string.
#[derive(Debug, Clone)]
pub struct ProjectStatusParseError(pub String);

impl fmt::Display for ProjectStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid project status: {:?}", self.0)
    }
}

impl std::error::Error for ProjectStatusParseError {}

// ---------------------------------------------------------------------------

/// Pipeline checkpoint kinds, in the order the pipeline reaches them.
///
/// The string forms and the ordering are relied on by external tooling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    FilesUploaded,
    OutlineGenerated,
    DraftCompleted,
    BlogRefined,
    SocialGenerated,
}

impl MilestoneType {
    /// Every milestone type in pipeline order.
    pub const ALL: [MilestoneType; 5] = [
        Self::FilesUploaded,
        Self::OutlineGenerated,
        Self::DraftCompleted,
        Self::BlogRefined,
        Self::SocialGenerated,
    ];

    /// Zero-based position in the pipeline.
    pub fn ordinal(self) -> usize {
        match self {
            Self::FilesUploaded => 0,
            Self::OutlineGenerated => 1,
            Self::DraftCompleted => 2,
            Self::BlogRefined => 3,
            Self::SocialGenerated => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FilesUploaded => "files_uploaded",
            Self::OutlineGenerated => "outline_generated",
            Self::DraftCompleted => "draft_completed",
            Self::BlogRefined => "blog_refined",
            Self::SocialGenerated => "social_generated",
        }
    }
}

impl fmt::Display for MilestoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneType {
    type Err = MilestoneTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "files_uploaded" => Ok(Self::FilesUploaded),
            "outline_generated" => Ok(Self::OutlineGenerated),
            "draft_completed" => Ok(Self::DraftCompleted),
            "blog_refined" => Ok(Self::BlogRefined),
            "social_generated" => Ok(Self::SocialGenerated),
            other => Err(MilestoneTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`MilestoneType`] string.
#[derive(Debug, Clone)]
pub struct MilestoneTypeParseError(pub String);

impl fmt::Display for MilestoneTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid milestone type: {:?}", self.0)
    }
}

impl std::error::Error for MilestoneTypeParseError {}

// ---------------------------------------------------------------------------

/// Generation status of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Generating,
    Completed,
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for SectionStatus {
    type Err = SectionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "completed" => Ok(Self::Completed),
            other => Err(SectionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SectionStatus`] string.
#[derive(Debug, Clone)]
pub struct SectionStatusParseError(pub String);

impl fmt::Display for SectionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid section status: {:?}", self.0)
    }
}

impl std::error::Error for SectionStatusParseError {}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A content project -- one blog moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub status: ProjectStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An append-only checkpoint event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Milestone {
    pub id: i64,
    pub project_id: Uuid,
    pub milestone_type: MilestoneType,
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One ordered content unit of a project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Section {
    pub id: i64,
    pub project_id: Uuid,
    pub section_index: i32,
    pub title: String,
    pub content: String,
    pub status: SectionStatus,
    pub cost_delta: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub updated_at: DateTime<Utc>,
}

/// Fields for writing a section. The row id and timestamp are server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSection {
    pub section_index: i32,
    pub title: String,
    pub content: String,
    pub status: SectionStatus,
    pub cost_delta: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl NewSection {
    /// A section that has been planned but not generated yet.
    pub fn pending(section_index: i32, title: impl Into<String>) -> Self {
        Self {
            section_index,
            title: title.into(),
            content: String::new(),
            status: SectionStatus::Pending,
            cost_delta: 0.0,
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// One metered model call.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CostRecord {
    pub id: i64,
    pub project_id: Uuid,
    pub agent_name: String,
    pub operation: String,
    pub model_used: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The final refined blog of a project. One row per project.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompletedBlog {
    pub project_id: Uuid,
    pub title: String,
    pub final_content: String,
    pub word_count: i32,
    pub total_cost: f64,
    pub generation_time_seconds: f64,
    pub version: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
