//! In-flight unit types for the refinement loop.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation::QualityScores;

/// What the loop is asked to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub section_index: i32,
    pub title: String,
    /// Goals the section has to cover; passed through to collaborators.
    #[serde(default)]
    pub learning_goals: Vec<String>,
    /// Free-form outline data for this section.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl UnitSpec {
    pub fn new(section_index: i32, title: impl Into<String>) -> Self {
        Self {
            section_index,
            title: title.into(),
            learning_goals: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    /// Query text handed to the retriever.
    pub fn search_query(&self) -> String {
        if self.learning_goals.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.learning_goals.join(" "))
        }
    }
}

/// A retrieved chunk of source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReference {
    pub content: String,
    pub relevance: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Something pulled out of generated content, such as a code example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryArtifact {
    pub content: String,
    pub language: Option<String>,
    pub description: String,
    pub explanation: String,
}

impl AuxiliaryArtifact {
    /// Stand-in used when extraction fails: the unparsed text with
    /// placeholder metadata.
    pub fn fallback(raw: &str) -> Self {
        Self {
            content: raw.to_owned(),
            language: None,
            description: "Code example 1".to_owned(),
            explanation: String::new(),
        }
    }
}

/// A content snapshot taken before the content was replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitVersion {
    pub content: String,
    pub version_number: u32,
    pub timestamp: DateTime<Utc>,
    pub change_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Auto,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub content: String,
    pub source: FeedbackSource,
    pub timestamp: DateTime<Utc>,
    pub addressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Draft,
    Approved,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
        })
    }
}

/// A collaborator failure recorded against the unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitError {
    /// State the loop was in, e.g. `validating`.
    pub state: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// One content unit moving through the refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftUnit {
    pub section_index: i32,
    pub title: String,
    pub content: String,
    pub versions: Vec<UnitVersion>,
    pub feedback: Vec<Feedback>,
    pub quality: QualityScores,
    /// Scores from every validation pass, oldest first.
    pub quality_history: Vec<QualityScores>,
    pub current_version: u32,
    pub status: UnitStatus,
    pub auxiliary: Vec<AuxiliaryArtifact>,
    pub errors: Vec<UnitError>,
    /// Validation passes in the current loop. Reset on finalize.
    pub iteration_count: u32,
}

impl DraftUnit {
    pub fn new(spec: &UnitSpec) -> Self {
        Self {
            section_index: spec.section_index,
            title: spec.title.clone(),
            content: String::new(),
            versions: Vec::new(),
            feedback: Vec::new(),
            quality: QualityScores::default(),
            quality_history: Vec::new(),
            current_version: 0,
            status: UnitStatus::Draft,
            auxiliary: Vec::new(),
            errors: Vec::new(),
            iteration_count: 0,
        }
    }

    /// Snapshot the current content, then replace it.
    pub fn revise(&mut self, content: String, change_description: impl Into<String>) {
        let previous = std::mem::replace(&mut self.content, content);
        self.versions.push(UnitVersion {
            content: previous,
            version_number: self.current_version,
            timestamp: Utc::now(),
            change_description: change_description.into(),
        });
        self.current_version += 1;
    }

    pub fn add_feedback(&mut self, content: impl Into<String>, source: FeedbackSource) {
        self.feedback.push(Feedback {
            content: content.into(),
            source,
            timestamp: Utc::now(),
            addressed: false,
        });
    }

    /// Content of the most recently added unaddressed feedback.
    pub fn latest_unaddressed_feedback(&self) -> Option<&str> {
        self.feedback
            .iter()
            .rev()
            .find(|f| !f.addressed)
            .map(|f| f.content.as_str())
    }

    /// Mark every unaddressed entry as addressed. Returns how many changed.
    pub fn mark_feedback_addressed(&mut self) -> usize {
        let mut marked = 0;
        for entry in self.feedback.iter_mut().filter(|f| !f.addressed) {
            entry.addressed = true;
            marked += 1;
        }
        marked
    }

    pub fn record_error(&mut self, state: impl Into<String>, message: impl Into<String>) {
        self.errors.push(UnitError {
            state: state.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn is_approved(&self) -> bool {
        self.status == UnitStatus::Approved
    }
}
