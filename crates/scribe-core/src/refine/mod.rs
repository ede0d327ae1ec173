//! Bounded, quality-gated refinement of one content unit.
//!
//! ```text
//! drafting -> enhancing -> extracting_auxiliary -> validating
//! validating -> finalized              (score >= threshold or pass cap hit)
//! validating -> auto_feedback -> incorporating -> validating
//! ```
//!
//! The loop always terminates: every trip through `validating` counts
//! toward `max_iterations`, whatever the collaborators return.

mod collaborators;
mod feedback;
mod machine;
mod types;
mod validation;

pub use collaborators::{
    AuxiliaryExtractor, ContentGenerator, DRAFT_STAGE, GenerationContext, NoArtifacts,
    NoReferences, QualityScorer, Retriever, SectionSink,
};
pub use feedback::{FEEDBACK_THRESHOLD, GENERIC_FEEDBACK, auto_feedback, feedback_points};
pub use machine::{RefinementConfig, RefinementState, SectionRefiner};
pub use types::{
    AuxiliaryArtifact, ContentReference, DraftUnit, Feedback, FeedbackSource, UnitError,
    UnitSpec, UnitStatus, UnitVersion,
};
pub use validation::{QualityScores, REQUIRED_METRICS, ValidationParseError, parse_report};
