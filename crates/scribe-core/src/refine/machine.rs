//! The refinement loop itself.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use scribe_db::StoreResult;
use scribe_db::models::{NewSection, SectionStatus};

use super::collaborators::{
    AuxiliaryExtractor, ContentGenerator, GenerationContext, QualityScorer, SectionSink,
};
use super::feedback::auto_feedback;
use super::types::{AuxiliaryArtifact, ContentReference, DraftUnit, FeedbackSource, UnitSpec, UnitStatus};
use super::validation::{QualityScores, parse_report};
use crate::cost::CostLedger;

/// Characters of the feedback directive kept in a version's change
/// description.
const CHANGE_DESCRIPTION_FEEDBACK_CHARS: usize = 50;

/// States of the refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementState {
    Drafting,
    Enhancing,
    ExtractingAuxiliary,
    Validating,
    AutoFeedback,
    Incorporating,
    Finalized,
}

impl RefinementState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drafting => "drafting",
            Self::Enhancing => "enhancing",
            Self::ExtractingAuxiliary => "extracting_auxiliary",
            Self::Validating => "validating",
            Self::AutoFeedback => "auto_feedback",
            Self::Incorporating => "incorporating",
            Self::Finalized => "finalized",
        }
    }

    /// Whether `from -> to` is an edge of the loop.
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Drafting, Self::Enhancing)
                | (Self::Enhancing, Self::ExtractingAuxiliary)
                | (Self::ExtractingAuxiliary, Self::Validating)
                | (Self::Validating, Self::Finalized)
                | (Self::Validating, Self::AutoFeedback)
                | (Self::AutoFeedback, Self::Incorporating)
                | (Self::Incorporating, Self::Validating)
        )
    }
}

impl fmt::Display for RefinementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// `overall_score` at or above which a unit is accepted early.
    pub quality_threshold: f64,
    /// Validation passes after which a unit is accepted regardless.
    pub max_iterations: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.8,
            max_iterations: 3,
        }
    }
}

/// Inputs shared by every state of one unit's run.
struct UnitRun<'a> {
    project_id: Uuid,
    spec: &'a UnitSpec,
    references: Arc<[ContentReference]>,
    ledger: Option<Arc<CostLedger>>,
}

impl UnitRun<'_> {
    fn ctx(&self, state: RefinementState, iteration: Option<u32>) -> GenerationContext {
        GenerationContext {
            project_id: self.project_id,
            section_index: self.spec.section_index,
            node: state.as_str(),
            iteration,
            references: Arc::clone(&self.references),
            ledger: self.ledger.clone(),
        }
    }
}

/// Drives units through the refinement loop and persists them when done.
#[derive(Clone)]
pub struct SectionRefiner {
    generator: Arc<dyn ContentGenerator>,
    scorer: Arc<dyn QualityScorer>,
    extractor: Arc<dyn AuxiliaryExtractor>,
    sink: Arc<dyn SectionSink>,
    config: RefinementConfig,
}

impl SectionRefiner {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        scorer: Arc<dyn QualityScorer>,
        extractor: Arc<dyn AuxiliaryExtractor>,
        sink: Arc<dyn SectionSink>,
    ) -> Self {
        Self {
            generator,
            scorer,
            extractor,
            sink,
            config: RefinementConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Produce one finished unit from `spec` and persist it.
    ///
    /// Collaborator failures are recorded on the returned unit; only a
    /// failure to persist the finished unit is returned as an error.
    pub async fn refine(
        &self,
        project_id: Uuid,
        spec: &UnitSpec,
        references: Arc<[ContentReference]>,
        ledger: Option<Arc<CostLedger>>,
    ) -> StoreResult<DraftUnit> {
        let run = UnitRun {
            project_id,
            spec,
            references,
            ledger,
        };
        let mut unit = DraftUnit::new(spec);
        self.drive(&mut unit, &run, RefinementState::Drafting).await?;
        Ok(unit)
    }

    /// Apply user feedback to a unit and send it back through the loop,
    /// starting at `incorporating` with a fresh pass counter.
    pub async fn revise_with_feedback(
        &self,
        project_id: Uuid,
        spec: &UnitSpec,
        unit: &mut DraftUnit,
        feedback: &str,
        ledger: Option<Arc<CostLedger>>,
    ) -> StoreResult<()> {
        unit.add_feedback(feedback, FeedbackSource::User);
        unit.status = UnitStatus::Draft;
        unit.iteration_count = 0;
        let run = UnitRun {
            project_id,
            spec,
            references: Arc::from(Vec::new()),
            ledger,
        };
        self.drive(unit, &run, RefinementState::Incorporating).await
    }

    /// Approve the unit, reset its pass counter and persist it as a
    /// completed section. Safe to call again on an approved unit.
    pub async fn finalize(
        &self,
        project_id: Uuid,
        unit: &mut DraftUnit,
        ledger: Option<&CostLedger>,
    ) -> StoreResult<()> {
        let passes = unit.iteration_count;
        unit.status = UnitStatus::Approved;
        unit.iteration_count = 0;

        let usage = ledger
            .map(|l| l.section_usage(unit.section_index))
            .unwrap_or_default();
        let section = NewSection {
            section_index: unit.section_index,
            title: unit.title.clone(),
            content: unit.content.clone(),
            status: SectionStatus::Completed,
            cost_delta: usage.cost,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        };
        self.sink.persist_section(project_id, section).await?;

        info!(
            project_id = %project_id,
            section_index = unit.section_index,
            passes,
            overall_score = unit.quality.overall_score,
            errors = unit.errors.len(),
            "section finalized"
        );
        Ok(())
    }

    /// Returns `true` when the loop should stop after the last pass.
    pub fn should_finalize(&self, unit: &DraftUnit) -> bool {
        unit.quality.overall_score >= self.config.quality_threshold
            || unit.iteration_count >= self.config.max_iterations
    }

    async fn drive(
        &self,
        unit: &mut DraftUnit,
        run: &UnitRun<'_>,
        start: RefinementState,
    ) -> StoreResult<()> {
        let mut state = start;
        loop {
            let next = match state {
                RefinementState::Drafting => {
                    self.draft(unit, run).await;
                    RefinementState::Enhancing
                }
                RefinementState::Enhancing => {
                    self.enhance(unit, run).await;
                    RefinementState::ExtractingAuxiliary
                }
                RefinementState::ExtractingAuxiliary => {
                    self.extract_auxiliary(unit, run).await;
                    RefinementState::Validating
                }
                RefinementState::Validating => {
                    self.validate(unit, run).await;
                    if self.should_finalize(unit) {
                        RefinementState::Finalized
                    } else {
                        RefinementState::AutoFeedback
                    }
                }
                RefinementState::AutoFeedback => {
                    unit.add_feedback(auto_feedback(&unit.quality), FeedbackSource::Auto);
                    RefinementState::Incorporating
                }
                RefinementState::Incorporating => {
                    self.incorporate(unit, run).await;
                    RefinementState::Validating
                }
                RefinementState::Finalized => {
                    return self
                        .finalize(run.project_id, unit, run.ledger.as_deref())
                        .await;
                }
            };
            debug_assert!(RefinementState::is_valid_transition(state, next));
            debug!(
                project_id = %run.project_id,
                section_index = unit.section_index,
                from = %state,
                to = %next,
                iteration = unit.iteration_count,
                "refinement transition"
            );
            state = next;
        }
    }

    async fn draft(&self, unit: &mut DraftUnit, run: &UnitRun<'_>) {
        let state = RefinementState::Drafting;
        match self.generator.generate(run.spec, &run.ctx(state, None)).await {
            Ok(text) => unit.content = text,
            Err(e) => collaborator_failed(unit, run, state, &e),
        }
        unit.current_version = 1;
        unit.status = UnitStatus::Draft;
    }

    async fn enhance(&self, unit: &mut DraftUnit, run: &UnitRun<'_>) {
        let state = RefinementState::Enhancing;
        match self
            .generator
            .enhance(&unit.content, &run.ctx(state, None))
            .await
        {
            Ok(text) => unit.revise(text, "Initial enhancement"),
            Err(e) => collaborator_failed(unit, run, state, &e),
        }
    }

    async fn extract_auxiliary(&self, unit: &mut DraftUnit, run: &UnitRun<'_>) {
        let state = RefinementState::ExtractingAuxiliary;
        match self.extractor.extract(&unit.content).await {
            Ok(artifacts) => unit.auxiliary = artifacts,
            Err(e) => {
                collaborator_failed(unit, run, state, &e);
                unit.auxiliary = vec![AuxiliaryArtifact::fallback(&unit.content)];
            }
        }
    }

    async fn validate(&self, unit: &mut DraftUnit, run: &UnitRun<'_>) {
        let state = RefinementState::Validating;
        let pass = unit.iteration_count + 1;
        let scores = match self
            .scorer
            .score(&unit.content, run.spec, &run.ctx(state, Some(pass)))
            .await
        {
            Ok(raw) => match parse_report(&raw) {
                Ok(scores) => scores,
                Err(e) => {
                    unit.record_error(state.as_str(), e.to_string());
                    QualityScores::default()
                }
            },
            Err(e) => {
                collaborator_failed(unit, run, state, &e);
                QualityScores::default()
            }
        };
        unit.quality = scores;
        unit.quality_history.push(scores);
        unit.iteration_count = pass;
    }

    async fn incorporate(&self, unit: &mut DraftUnit, run: &UnitRun<'_>) {
        let state = RefinementState::Incorporating;
        let Some(directive) = unit.latest_unaddressed_feedback().map(str::to_owned) else {
            return;
        };
        let iteration = Some(unit.iteration_count).filter(|n| *n > 0);
        match self
            .generator
            .incorporate_feedback(&unit.content, &directive, &run.ctx(state, iteration))
            .await
        {
            Ok(text) => {
                unit.revise(text, change_description(&directive));
                // Older unaddressed entries are superseded by the one used.
                unit.mark_feedback_addressed();
            }
            Err(e) => collaborator_failed(unit, run, state, &e),
        }
    }
}

fn collaborator_failed(
    unit: &mut DraftUnit,
    run: &UnitRun<'_>,
    state: RefinementState,
    err: &anyhow::Error,
) {
    let message = format!("{err:#}");
    warn!(
        project_id = %run.project_id,
        section_index = unit.section_index,
        state = %state,
        error = %message,
        "collaborator call failed"
    );
    unit.record_error(state.as_str(), message);
}

fn change_description(feedback: &str) -> String {
    let head: String = feedback
        .chars()
        .take(CHANGE_DESCRIPTION_FEEDBACK_CHARS)
        .collect();
    format!("Feedback incorporation: {head}...")
}
