//! Stage drivers: draft, refine, distribute.
//!
//! The draft stage fans units out to concurrent refinement tasks, bounded
//! by a semaphore; a failing unit never cancels its siblings. Each stage
//! records its milestone only when it fully succeeds.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use scribe_db::models::{
    CompletedBlog, Milestone, MilestoneType, NewSection, Section, SectionStatus,
};
use scribe_db::queries::completed_blogs::NewCompletedBlog;
use scribe_db::queries::cost_records;
use scribe_db::queries::sections::SectionUpdate;

use crate::cost::{CostCall, CostLedger};
use crate::error::{WorkflowError, WorkflowResult};
use crate::project::ProjectManager;
use crate::refine::{ContentReference, DraftUnit, Retriever, SectionRefiner, UnitSpec};

pub const REFINE_STAGE: &str = "refine";
pub const DISTRIBUTE_STAGE: &str = "distribute";

/// Limits for the draft stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Units refined at the same time.
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_concurrency: 3 }
    }
}

// ---------------------------------------------------------------------------
// Stage collaborators
// ---------------------------------------------------------------------------

/// Scope handed to stage collaborators for cost recording.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub project_id: Uuid,
    pub stage: &'static str,
    pub ledger: Arc<CostLedger>,
}

impl StageContext {
    pub async fn record_usage(
        &self,
        agent: &str,
        node: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) {
        let call = CostCall::new(agent, node, model)
            .tokens(input_tokens, output_tokens)
            .cost(cost)
            .stage(self.stage);
        self.ledger.record(call).await;
    }
}

/// Output of the external refinement service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedBlog {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait BlogRefiner: Send + Sync {
    async fn refine(&self, draft: &str, ctx: &StageContext) -> Result<RefinedBlog>;
}

#[async_trait]
pub trait Distributor: Send + Sync {
    /// Produce social/export artifacts for the refined text.
    async fn distribute(
        &self,
        title: &str,
        content: &str,
        ctx: &StageContext,
    ) -> Result<serde_json::Value>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn BlogRefiner, _: &dyn Distributor) {}
};

// ---------------------------------------------------------------------------
// Draft stage
// ---------------------------------------------------------------------------

/// A unit that could not be finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub section_index: i32,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct DraftOutcome {
    /// Units finished by this run, by section index.
    pub units: Vec<DraftUnit>,
    /// Units of this run that failed, plus stored sections still unfinished.
    pub failures: Vec<UnitFailure>,
    /// The `draft_completed` milestone; `None` until every stored section
    /// is completed.
    pub milestone: Option<Milestone>,
}

/// Message from a unit task back to the stage loop.
struct UnitDone {
    section_index: i32,
    title: String,
    result: WorkflowResult<DraftUnit>,
}

/// Runs the pipeline stages for projects.
#[derive(Clone)]
pub struct Pipeline {
    projects: ProjectManager,
    refiner: SectionRefiner,
    retriever: Arc<dyn Retriever>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        projects: ProjectManager,
        refiner: SectionRefiner,
        retriever: Arc<dyn Retriever>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            projects,
            refiner,
            retriever,
            config,
        }
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    /// Refine the given units and record `draft_completed` once every
    /// stored section is completed.
    ///
    /// Requires the `outline_generated` milestone. The given units are
    /// written as `pending` first so progress reflects them immediately.
    /// When the project already has sections outside `specs`, only the given
    /// units are reset, so retrying the failed units of an earlier run keeps
    /// the finished ones.
    pub async fn run_draft_stage(
        &self,
        project_id: Uuid,
        specs: Vec<UnitSpec>,
        ledger: Arc<CostLedger>,
    ) -> WorkflowResult<DraftOutcome> {
        self.require(project_id, MilestoneType::OutlineGenerated)
            .await?;

        let store = self.projects.store().clone();
        let planned: Vec<NewSection> = specs
            .iter()
            .map(|s| NewSection::pending(s.section_index, s.title.clone()))
            .collect();
        let stored = store.load_sections(project_id).await?;
        let retry = stored
            .iter()
            .any(|s| !specs.iter().any(|spec| spec.section_index == s.section_index));
        if retry {
            for section in &planned {
                store.upsert_section(project_id, section).await?;
            }
        } else {
            store.save_sections(project_id, &planned).await?;
        }

        info!(
            project_id = %project_id,
            units = specs.len(),
            retry,
            max_concurrency = self.config.max_concurrency,
            "draft stage started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let (tx, mut rx) = mpsc::channel::<UnitDone>(specs.len().max(1));
        let expected: Vec<(i32, String)> = specs
            .iter()
            .map(|s| (s.section_index, s.title.clone()))
            .collect();

        for spec in specs {
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let store = store.clone();
            let refiner = self.refiner.clone();
            let retriever = Arc::clone(&self.retriever);
            let ledger = Arc::clone(&ledger);

            tokio::spawn(async move {
                // The semaphore is never closed.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let references = retrieve(retriever.as_ref(), project_id, &spec).await;
                let result: WorkflowResult<DraftUnit> = async {
                    store
                        .update_section_status(
                            project_id,
                            spec.section_index,
                            SectionStatus::Generating,
                            &SectionUpdate::default(),
                        )
                        .await?;
                    let unit = refiner
                        .refine(project_id, &spec, references, Some(ledger))
                        .await?;
                    Ok::<_, WorkflowError>(unit)
                }
                .await;
                let section_index = spec.section_index;
                let done = UnitDone {
                    section_index,
                    title: spec.title,
                    result,
                };
                if tx.send(done).await.is_err() {
                    debug!(
                        project_id = %project_id,
                        section_index,
                        "draft stage stopped listening, unit result dropped"
                    );
                }
            });
        }
        drop(tx);

        let mut units = Vec::new();
        let mut failures = Vec::new();
        let mut reported = Vec::new();
        while let Some(done) = rx.recv().await {
            reported.push(done.section_index);
            match done.result {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        section_index = done.section_index,
                        error = %e,
                        "unit failed"
                    );
                    failures.push(UnitFailure {
                        section_index: done.section_index,
                        title: done.title,
                        error: e.to_string(),
                    });
                }
            }
        }
        // A task that panicked never reports back.
        for (section_index, title) in expected {
            if !reported.contains(&section_index) {
                failures.push(UnitFailure {
                    section_index,
                    title,
                    error: "unit task aborted".to_owned(),
                });
            }
        }

        units.sort_by_key(|u| u.section_index);

        // Units this run did not touch count too: the draft is compiled from
        // the whole stored section set.
        let sections = store.load_sections(project_id).await?;
        if failures.is_empty() {
            failures.extend(
                sections
                    .iter()
                    .filter(|s| s.status != SectionStatus::Completed)
                    .map(|s| UnitFailure {
                        section_index: s.section_index,
                        title: s.title.clone(),
                        error: format!("section is {}", s.status),
                    }),
            );
        }
        failures.sort_by_key(|f| f.section_index);

        if !failures.is_empty() {
            warn!(
                project_id = %project_id,
                failed = failures.len(),
                finished = units.len(),
                "draft stage incomplete, milestone not recorded"
            );
            return Ok(DraftOutcome {
                units,
                failures,
                milestone: None,
            });
        }

        let data = json!({
            "compiled_blog": compile_draft(&sections),
            "section_count": sections.len(),
            "total_cost": ledger.total_cost(),
        });
        let milestone = self
            .projects
            .save_milestone(project_id, MilestoneType::DraftCompleted, data, json!({}))
            .await?;

        info!(
            project_id = %project_id,
            units = units.len(),
            sections = sections.len(),
            "draft stage completed"
        );
        Ok(DraftOutcome {
            units,
            failures,
            milestone: Some(milestone),
        })
    }

    // -----------------------------------------------------------------------
    // Refine and distribute
    // -----------------------------------------------------------------------

    /// Run the external refiner over the compiled draft, record
    /// `blog_refined` and save the completed blog.
    pub async fn run_refine_stage(
        &self,
        project_id: Uuid,
        refiner: &dyn BlogRefiner,
        ledger: Arc<CostLedger>,
    ) -> WorkflowResult<CompletedBlog> {
        let draft = self
            .require(project_id, MilestoneType::DraftCompleted)
            .await?;
        let compiled = draft
            .data
            .get("compiled_blog")
            .and_then(|v| v.as_str())
            .ok_or_else(|| stage_failed(REFINE_STAGE, "draft has no compiled_blog text"))?;

        let ctx = StageContext {
            project_id,
            stage: REFINE_STAGE,
            ledger: Arc::clone(&ledger),
        };
        let refined = refiner
            .refine(compiled, &ctx)
            .await
            .map_err(|e| stage_failed(REFINE_STAGE, format!("{e:#}")))?;

        let word_count = word_count(&refined.content);
        self.projects
            .save_milestone(
                project_id,
                MilestoneType::BlogRefined,
                json!({
                    "title": refined.title,
                    "refined_content": refined.content,
                    "word_count": word_count,
                }),
                json!({}),
            )
            .await?;

        let project = self.projects.get(project_id).await?;
        let total_cost = if ledger.is_persistent() {
            cost_records::total_cost(self.projects.store().pool(), project_id).await?
        } else {
            ledger.total_cost()
        };
        let generation_time_seconds =
            (Utc::now() - project.created_at).num_milliseconds().max(0) as f64 / 1000.0;

        let blog = NewCompletedBlog {
            title: refined.title,
            final_content: refined.content,
            word_count,
            total_cost,
            generation_time_seconds,
            metadata: refined.metadata,
        };
        self.projects.save_completed_blog(project_id, &blog).await
    }

    /// Produce distribution artifacts and record `social_generated`.
    pub async fn run_distribution_stage(
        &self,
        project_id: Uuid,
        distributor: &dyn Distributor,
        ledger: Arc<CostLedger>,
    ) -> WorkflowResult<Milestone> {
        let refined = self
            .require(project_id, MilestoneType::BlogRefined)
            .await?;
        let content = refined
            .data
            .get("refined_content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| stage_failed(DISTRIBUTE_STAGE, "refined blog has no content"))?;
        let title = refined
            .data
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let ctx = StageContext {
            project_id,
            stage: DISTRIBUTE_STAGE,
            ledger,
        };
        let artifacts = distributor
            .distribute(title, content, &ctx)
            .await
            .map_err(|e| stage_failed(DISTRIBUTE_STAGE, format!("{e:#}")))?;
        let data = if artifacts.is_object() {
            artifacts
        } else {
            json!({ "artifacts": artifacts })
        };

        self.projects
            .save_milestone(project_id, MilestoneType::SocialGenerated, data, json!({}))
            .await
    }

    async fn require(
        &self,
        project_id: Uuid,
        milestone: MilestoneType,
    ) -> WorkflowResult<Milestone> {
        // Surface unknown projects as NotFound rather than a missing input.
        self.projects.get(project_id).await?;
        self.projects
            .load_milestone(project_id, milestone)
            .await?
            .ok_or(WorkflowError::MissingStageInput {
                project_id,
                milestone,
            })
    }
}

/// Source material for one unit. Retrieval failures leave the unit without
/// references rather than failing it.
async fn retrieve(
    retriever: &dyn Retriever,
    project_id: Uuid,
    spec: &UnitSpec,
) -> Arc<[ContentReference]> {
    let filters = json!({ "project_id": project_id });
    match retriever.search(&spec.search_query(), &filters).await {
        Ok(refs) => refs.into(),
        Err(e) => {
            warn!(
                project_id = %project_id,
                section_index = spec.section_index,
                error = %format!("{e:#}"),
                "retrieval failed, continuing without references"
            );
            Arc::from(Vec::new())
        }
    }
}

/// `## title` followed by the content, for every section in order.
pub fn compile_draft(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n\n{}", s.title, s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn word_count(text: &str) -> i32 {
    i32::try_from(text.split_whitespace().count()).unwrap_or(i32::MAX)
}

fn stage_failed(stage: &'static str, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::StageFailed {
        stage,
        reason: reason.into(),
    }
}
