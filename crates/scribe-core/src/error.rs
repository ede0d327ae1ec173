use thiserror::Error;
use uuid::Uuid;

use scribe_db::StoreError;
use scribe_db::models::MilestoneType;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors surfaced to callers of the workflow engine.
///
/// Collaborator failures inside the refinement loop never reach this type;
/// they are recorded on the unit and the loop carries on.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported export format {0:?} (expected json or markdown)")]
    UnsupportedExportFormat(String),

    /// A stage was started before the milestone it consumes exists.
    #[error("project {project_id} has no {milestone} milestone")]
    MissingStageInput {
        project_id: Uuid,
        milestone: MilestoneType,
    },

    /// An external stage collaborator failed or some units did not finish.
    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: &'static str, reason: String },

    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl WorkflowError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}
