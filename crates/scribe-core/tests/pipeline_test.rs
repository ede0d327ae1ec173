//! End-to-end pipeline tests with scripted collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use scribe_core::WorkflowError;
use scribe_core::cost::CostLedger;
use scribe_core::pipeline::{
    BlogRefiner, Distributor, Pipeline, PipelineConfig, RefinedBlog, StageContext,
};
use scribe_core::project::{NextStep, ProjectManager};
use scribe_core::refine::{
    ContentGenerator, ContentReference, GenerationContext, NoArtifacts, QualityScorer,
    RefinementConfig, Retriever, SectionRefiner, SectionSink, UnitSpec,
};
use scribe_core::store::WorkflowStore;
use scribe_db::StoreError;
use scribe_db::StoreResult;
use scribe_db::models::{MilestoneType, NewSection, SectionStatus};
use scribe_test_utils::{create_test_db, drop_test_db};

// ===========================================================================
// Collaborators
// ===========================================================================

struct Writer {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Writer {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentGenerator for Writer {
    async fn generate(&self, spec: &UnitSpec, ctx: &GenerationContext) -> Result<String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        ctx.record_usage("writer", "model-a", 120, 300, 0.003).await;
        Ok(format!(
            "{} from {} references",
            spec.title,
            ctx.references.len()
        ))
    }

    async fn enhance(&self, text: &str, _ctx: &GenerationContext) -> Result<String> {
        Ok(format!("{text}, enhanced"))
    }

    async fn incorporate_feedback(
        &self,
        text: &str,
        _feedback: &str,
        _ctx: &GenerationContext,
    ) -> Result<String> {
        Ok(format!("{text}, revised"))
    }
}

struct FixedScorer(f64);

#[async_trait]
impl QualityScorer for FixedScorer {
    async fn score(
        &self,
        _text: &str,
        _spec: &UnitSpec,
        _ctx: &GenerationContext,
    ) -> Result<serde_json::Value> {
        Ok(json!({
            "completeness": self.0,
            "technical_accuracy": self.0,
            "clarity": self.0,
            "code_quality": self.0,
            "engagement": self.0,
            "overall_score": self.0,
        }))
    }
}

/// Returns one reference, except for titles containing "offline".
struct Library;

#[async_trait]
impl Retriever for Library {
    async fn search(
        &self,
        query: &str,
        _filters: &serde_json::Value,
    ) -> Result<Vec<ContentReference>> {
        if query.contains("offline") {
            return Err(anyhow!("index unavailable"));
        }
        Ok(vec![ContentReference {
            content: format!("notes on {query}"),
            relevance: 0.9,
            metadata: json!({}),
        }])
    }
}

/// Delegates to the store, refusing each listed section index once.
struct PickySink {
    store: WorkflowStore,
    refuse: Mutex<HashSet<i32>>,
}

#[async_trait]
impl SectionSink for PickySink {
    async fn persist_section(&self, project_id: Uuid, section: NewSection) -> StoreResult<()> {
        let refused = self.refuse.lock().unwrap().remove(&section.section_index);
        if refused {
            return Err(StoreError::not_found(
                "section",
                section.section_index.to_string(),
            ));
        }
        self.store.persist_section(project_id, section).await
    }
}

struct Polisher {
    fail: bool,
}

#[async_trait]
impl BlogRefiner for Polisher {
    async fn refine(&self, draft: &str, ctx: &StageContext) -> Result<RefinedBlog> {
        if self.fail {
            return Err(anyhow!("refiner quota exceeded"));
        }
        ctx.record_usage("editor", "polish", "model-b", 1000, 900, 0.02)
            .await;
        Ok(RefinedBlog {
            title: "Learning Rust".to_owned(),
            content: format!("{draft}\n\nThanks for reading."),
            metadata: json!({"tone": "friendly"}),
        })
    }
}

struct Announcer {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl Distributor for Announcer {
    async fn distribute(
        &self,
        title: &str,
        _content: &str,
        ctx: &StageContext,
    ) -> Result<serde_json::Value> {
        self.seen.lock().unwrap().push(title.to_owned());
        ctx.record_usage("social", "thread", "model-b", 200, 100, 0.001)
            .await;
        Ok(json!({"thread": [format!("New post: {title}")]}))
    }
}

// ===========================================================================
// Harness
// ===========================================================================

struct Fixture {
    pool: sqlx::PgPool,
    db_name: String,
    project_id: Uuid,
    pipeline: Pipeline,
    writer: Arc<Writer>,
}

async fn fixture(refuse: &[i32], max_concurrency: usize) -> Fixture {
    let (pool, db_name) = create_test_db().await;
    let store = WorkflowStore::new(pool.clone());
    let projects = ProjectManager::new(store.clone());
    let project_id = projects.create("pipeline", json!({})).await.unwrap();

    let writer = Arc::new(Writer::new());
    let sink = Arc::new(PickySink {
        store,
        refuse: Mutex::new(refuse.iter().copied().collect()),
    });
    let refiner = SectionRefiner::new(
        writer.clone(),
        Arc::new(FixedScorer(0.9)),
        Arc::new(NoArtifacts),
        sink,
    )
    .with_config(RefinementConfig {
        quality_threshold: 0.8,
        max_iterations: 3,
    });
    let pipeline = Pipeline::new(
        projects,
        refiner,
        Arc::new(Library),
        PipelineConfig { max_concurrency },
    );

    Fixture {
        pool,
        db_name,
        project_id,
        pipeline,
        writer,
    }
}

impl Fixture {
    async fn outline(&self) {
        self.pipeline
            .projects()
            .save_milestone(
                self.project_id,
                MilestoneType::OutlineGenerated,
                json!({"title": "Learning Rust"}),
                json!({}),
            )
            .await
            .unwrap();
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
    }
}

fn specs(titles: &[&str]) -> Vec<UnitSpec> {
    titles
        .iter()
        .enumerate()
        .map(|(i, t)| UnitSpec::new(i as i32, *t))
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn full_pipeline_reaches_completed() {
    let fx = fixture(&[], 2).await;
    let id = fx.project_id;
    fx.outline().await;
    let ledger = Arc::new(CostLedger::new(id, fx.pool.clone()));

    let outcome = fx
        .pipeline
        .run_draft_stage(id, specs(&["Intro", "Ownership", "offline Traits"]), ledger.clone())
        .await
        .unwrap();
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.units.len(), 3);
    assert!(outcome.units.iter().all(|u| u.is_approved()));
    // Retrieval failure leaves the unit without references.
    assert!(outcome.units[2].content.starts_with("offline Traits from 0 references"));
    assert!(fx.writer.peak.load(Ordering::SeqCst) <= 2);

    let draft = outcome.milestone.unwrap();
    let compiled = draft.data["compiled_blog"].as_str().unwrap();
    assert!(compiled.starts_with("## Intro\n\nIntro from 1 references"));
    assert!(compiled.contains("\n\n## Ownership\n\n"));

    let sections = fx.pipeline.projects().store().load_sections(id).await.unwrap();
    assert_eq!(sections.len(), 3);
    assert!(sections.iter().all(|s| s.status == SectionStatus::Completed));
    assert!(sections.iter().all(|s| s.cost_delta > 0.0));

    let blog = fx
        .pipeline
        .run_refine_stage(id, &Polisher { fail: false }, ledger.clone())
        .await
        .unwrap();
    assert_eq!(blog.title, "Learning Rust");
    assert_eq!(blog.version, 1);
    assert!(blog.final_content.ends_with("Thanks for reading."));
    assert!((blog.total_cost - (3.0 * 0.003 + 0.02)).abs() < 1e-9);

    let announcer = Announcer {
        seen: Mutex::new(Vec::new()),
    };
    let social = fx
        .pipeline
        .run_distribution_stage(id, &announcer, ledger.clone())
        .await
        .unwrap();
    assert_eq!(social.data["thread"][0], "New post: Learning Rust");
    assert_eq!(*announcer.seen.lock().unwrap(), vec!["Learning Rust"]);

    // files_uploaded was never recorded, so resume points back at it.
    let state = fx.pipeline.projects().resume(id).await.unwrap();
    assert_eq!(state.next_step, NextStep::UploadFiles);
    assert!(state.completed_blog.is_some());
    assert!(state.project.completed_at.is_some());
    assert!(state.cost_summary.by_stage.contains_key("draft"));
    assert!(state.cost_summary.by_stage.contains_key("refine"));
    assert!(state.cost_summary.by_stage.contains_key("distribute"));
    assert!(!ledger.is_degraded());

    fx.teardown().await;
}

#[tokio::test]
async fn failing_unit_withholds_milestone_but_not_siblings() {
    let fx = fixture(&[1], 3).await;
    let id = fx.project_id;
    fx.outline().await;
    let ledger = Arc::new(CostLedger::in_memory(id));

    let outcome = fx
        .pipeline
        .run_draft_stage(id, specs(&["A", "B", "C"]), ledger)
        .await
        .unwrap();
    assert!(outcome.milestone.is_none());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].section_index, 1);
    assert_eq!(
        outcome.units.iter().map(|u| u.section_index).collect::<Vec<_>>(),
        vec![0, 2]
    );

    let sections = fx.pipeline.projects().store().load_sections(id).await.unwrap();
    let statuses: Vec<_> = sections.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            SectionStatus::Completed,
            SectionStatus::Generating,
            SectionStatus::Completed
        ]
    );
    assert!(
        fx.pipeline
            .projects()
            .load_milestone(id, MilestoneType::DraftCompleted)
            .await
            .unwrap()
            .is_none()
    );

    fx.teardown().await;
}

#[tokio::test]
async fn retrying_failed_unit_keeps_finished_siblings() {
    let fx = fixture(&[1], 3).await;
    let id = fx.project_id;
    fx.outline().await;
    let ledger = Arc::new(CostLedger::in_memory(id));

    let first = fx
        .pipeline
        .run_draft_stage(id, specs(&["A", "B", "C"]), ledger.clone())
        .await
        .unwrap();
    assert_eq!(first.failures.len(), 1);

    // Only the failed unit is sent again.
    let retry = fx
        .pipeline
        .run_draft_stage(id, vec![UnitSpec::new(1, "B")], ledger)
        .await
        .unwrap();
    assert!(retry.failures.is_empty(), "{:?}", retry.failures);
    assert_eq!(retry.units.len(), 1);

    let sections = fx.pipeline.projects().store().load_sections(id).await.unwrap();
    assert_eq!(sections.len(), 3);
    assert!(sections.iter().all(|s| s.status == SectionStatus::Completed));
    assert!(sections[0].content.starts_with("A from 1 references"));

    let draft = retry.milestone.unwrap();
    assert_eq!(draft.data["section_count"], 3);
    let compiled = draft.data["compiled_blog"].as_str().unwrap();
    for heading in ["## A\n\nA from", "## B\n\nB from", "## C\n\nC from"] {
        assert!(compiled.contains(heading), "missing {heading:?} in {compiled}");
    }
    assert!(compiled.find("## A").unwrap() < compiled.find("## C").unwrap());

    fx.teardown().await;
}

#[tokio::test]
async fn draft_waits_for_sections_outside_the_run() {
    let fx = fixture(&[], 2).await;
    let id = fx.project_id;
    fx.outline().await;
    let store = fx.pipeline.projects().store().clone();
    store
        .save_sections(
            id,
            &[NewSection::pending(0, "A"), NewSection::pending(1, "B")],
        )
        .await
        .unwrap();

    let outcome = fx
        .pipeline
        .run_draft_stage(id, vec![UnitSpec::new(0, "A")], Arc::new(CostLedger::in_memory(id)))
        .await
        .unwrap();
    assert_eq!(outcome.units.len(), 1);
    assert!(outcome.milestone.is_none());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].section_index, 1);
    assert_eq!(outcome.failures[0].error, "section is pending");

    fx.teardown().await;
}

#[tokio::test]
async fn stages_require_their_inputs() {
    let fx = fixture(&[], 1).await;
    let id = fx.project_id;
    let ledger = Arc::new(CostLedger::in_memory(id));

    let err = fx
        .pipeline
        .run_draft_stage(id, specs(&["A"]), ledger.clone())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::MissingStageInput {
            milestone: MilestoneType::OutlineGenerated,
            ..
        }
    ));
    // Nothing was written.
    assert!(fx.pipeline.projects().store().load_sections(id).await.unwrap().is_empty());

    let err = fx
        .pipeline
        .run_refine_stage(id, &Polisher { fail: false }, ledger.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::MissingStageInput { .. }));

    let err = fx
        .pipeline
        .run_draft_stage(Uuid::new_v4(), specs(&["A"]), ledger)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    fx.teardown().await;
}

#[tokio::test]
async fn refiner_failure_is_a_stage_failure() {
    let fx = fixture(&[], 1).await;
    let id = fx.project_id;
    fx.pipeline
        .projects()
        .save_milestone(
            id,
            MilestoneType::DraftCompleted,
            json!({"compiled_blog": "## A\n\ntext"}),
            json!({}),
        )
        .await
        .unwrap();

    let err = fx
        .pipeline
        .run_refine_stage(id, &Polisher { fail: true }, Arc::new(CostLedger::in_memory(id)))
        .await
        .unwrap_err();
    match err {
        WorkflowError::StageFailed { stage, reason } => {
            assert_eq!(stage, "refine");
            assert!(reason.contains("quota"));
        }
        other => panic!("expected StageFailed, got {other:?}"),
    }
    assert!(
        fx.pipeline
            .projects()
            .load_milestone(id, MilestoneType::BlogRefined)
            .await
            .unwrap()
            .is_none()
    );

    fx.teardown().await;
}
