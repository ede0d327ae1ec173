//! Integration tests for project lifecycle, progress, resume and export.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use scribe_core::cost::{CostCall, CostLedger};
use scribe_core::project::{ExportFormat, NextStep, ProjectManager};
use scribe_core::store::WorkflowStore;
use scribe_core::WorkflowError;
use scribe_db::models::{MilestoneType, NewSection, ProjectStatus, SectionStatus};
use scribe_db::queries::sections::SectionUpdate;
use scribe_test_utils::{create_test_db, drop_test_db};

fn pending(count: i32, suffix: &str) -> Vec<NewSection> {
    (0..count)
        .map(|i| NewSection::pending(i, format!("unit {i} {suffix}")))
        .collect()
}

#[tokio::test]
async fn create_get_and_duplicate_name() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));

    let id = manager.create("rust-intro", json!(null)).await.unwrap();
    let project = manager.get(id).await.unwrap();
    assert_eq!(project.name, "rust-intro");
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.metadata, json!({}));

    let by_name = manager.get_by_name("rust-intro").await.unwrap();
    assert_eq!(by_name.id, id);

    let err = manager.create("rust-intro", json!({})).await.unwrap_err();
    assert!(
        matches!(err, WorkflowError::Store(scribe_db::StoreError::DuplicateName(_))),
        "got {err:?}"
    );

    assert!(manager.get(Uuid::new_v4()).await.unwrap_err().is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn milestone_latest_write_wins() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));
    let id = manager.create("latest", json!({})).await.unwrap();

    manager
        .save_milestone(id, MilestoneType::OutlineGenerated, json!({"v": 1}), json!({}))
        .await
        .unwrap();
    manager
        .save_milestone(id, MilestoneType::OutlineGenerated, json!({"v": 2}), json!({}))
        .await
        .unwrap();

    let loaded = manager
        .load_milestone(id, MilestoneType::OutlineGenerated)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.data, json!({"v": 2}));
    assert!(
        manager
            .load_milestone(id, MilestoneType::DraftCompleted)
            .await
            .unwrap()
            .is_none()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn progress_combines_milestones_and_sections() {
    let (pool, db_name) = create_test_db().await;
    let store = WorkflowStore::new(pool.clone());
    let manager = ProjectManager::new(store.clone());
    let id = manager.create("progress", json!({})).await.unwrap();

    assert_eq!(manager.progress(id).await.unwrap().percentage, 0.0);

    manager
        .save_milestone(id, MilestoneType::FilesUploaded, json!({}), json!({}))
        .await
        .unwrap();
    manager
        .save_milestone(id, MilestoneType::OutlineGenerated, json!({}), json!({}))
        .await
        .unwrap();
    // No sections yet: only the milestone half counts.
    assert_eq!(manager.progress(id).await.unwrap().percentage, 20.0);

    store.save_sections(id, &pending(4, "p")).await.unwrap();
    for idx in 0..2 {
        store
            .update_section_status(id, idx, SectionStatus::Completed, &SectionUpdate::default())
            .await
            .unwrap();
    }
    let progress = manager.progress(id).await.unwrap();
    assert_eq!(progress.sections_completed, 2);
    assert_eq!(progress.sections_total, 4);
    assert!((progress.percentage - 45.0).abs() < 1e-9);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_section_saves_never_interleave() {
    let (pool, db_name) = create_test_db().await;
    let store = WorkflowStore::new(pool.clone());
    let manager = ProjectManager::new(store.clone());
    let id = manager.create("race", json!({})).await.unwrap();

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.save_sections(id, &pending(5, "a")).await })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.save_sections(id, &pending(3, "b")).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let loaded = store.load_sections(id).await.unwrap();
    assert!(loaded.len() == 5 || loaded.len() == 3, "got {}", loaded.len());
    let suffix = if loaded.len() == 5 { "a" } else { "b" };
    assert!(loaded.iter().all(|s| s.title.ends_with(suffix)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn resume_reports_next_step_and_costs() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));
    let id = manager.create("resume", json!({})).await.unwrap();

    let state = manager.resume(id).await.unwrap();
    assert_eq!(state.next_step, NextStep::UploadFiles);
    assert!(state.latest_milestone.is_none());

    manager
        .save_milestone(id, MilestoneType::FilesUploaded, json!({"files": 2}), json!({}))
        .await
        .unwrap();
    manager
        .save_milestone(id, MilestoneType::OutlineGenerated, json!({"title": "T"}), json!({}))
        .await
        .unwrap();

    let ledger = CostLedger::new(id, pool.clone());
    ledger
        .record(
            CostCall::new("writer", "drafting", "model-a")
                .tokens(100, 50)
                .cost(0.004)
                .stage("draft"),
        )
        .await;
    ledger
        .record(CostCall::new("scorer", "validating", "model-b").cost(0.001))
        .await;
    assert!(!ledger.is_degraded());

    let state = manager.resume(id).await.unwrap();
    assert_eq!(state.next_step, NextStep::GenerateDraft);
    assert_eq!(state.milestones.len(), 2);
    assert_eq!(
        state.latest_milestone.as_ref().unwrap().milestone_type,
        MilestoneType::OutlineGenerated
    );
    assert_eq!(
        state.milestone(MilestoneType::FilesUploaded).unwrap().data,
        json!({"files": 2})
    );
    assert_eq!(state.cost_summary.total_calls, 2);
    assert!((state.cost_summary.total_cost - 0.005).abs() < 1e-9);
    assert!(state.cost_summary.by_stage.contains_key("draft"));
    assert!(state.cost_summary.by_stage.contains_key("unassigned"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn export_markdown_prefers_furthest_text() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));
    let id = manager.create("export", json!({})).await.unwrap();

    manager
        .save_milestone(
            id,
            MilestoneType::DraftCompleted,
            json!({"compiled_blog": "## A\n\ndraft text"}),
            json!({}),
        )
        .await
        .unwrap();
    let md = manager.export(id, ExportFormat::Markdown).await.unwrap();
    assert!(md.starts_with("# export\n\n**Project ID**: "));
    assert!(md.contains("draft text"));

    manager
        .save_milestone(
            id,
            MilestoneType::BlogRefined,
            json!({"refined_content": "polished text"}),
            json!({}),
        )
        .await
        .unwrap();
    let md = manager.export(id, ExportFormat::Markdown).await.unwrap();
    assert!(md.contains("polished text"));
    assert!(!md.contains("draft text"));

    let exported = manager.export(id, ExportFormat::Json).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(value["project"]["name"], "export");
    // Earlier milestones are still missing.
    assert_eq!(value["next_step"], "upload_files");

    assert!(matches!(
        "pdf".parse::<ExportFormat>(),
        Err(WorkflowError::UnsupportedExportFormat(_))
    ));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn archive_list_and_delete() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));
    let keep = manager.create("keep", json!({})).await.unwrap();
    let old = manager.create("old", json!({})).await.unwrap();
    let gone = manager.create("gone", json!({})).await.unwrap();

    manager.archive(old).await.unwrap();
    manager.delete(gone, false).await.unwrap();

    let active = manager.list(Some(ProjectStatus::Active)).await.unwrap();
    assert_eq!(active.iter().map(|p| p.id).collect::<Vec<_>>(), vec![keep]);
    let visible = manager.list(None).await.unwrap();
    assert_eq!(visible.len(), 2);
    assert!(visible.iter().all(|p| p.id != gone));

    // Soft delete keeps the row, and a deleted project cannot come back
    // through archive.
    assert_eq!(manager.get(gone).await.unwrap().status, ProjectStatus::Deleted);
    assert!(manager.archive(gone).await.unwrap_err().is_not_found());
    assert_eq!(manager.get(gone).await.unwrap().status, ProjectStatus::Deleted);

    manager
        .save_milestone(keep, MilestoneType::FilesUploaded, json!({}), json!({}))
        .await
        .unwrap();
    manager.delete(keep, true).await.unwrap();
    assert!(manager.get(keep).await.unwrap_err().is_not_found());
    assert!(manager.resume(keep).await.unwrap_err().is_not_found());
    // Nothing holds a lock once the purge returns.
    assert!(manager.store().locks().is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn metadata_merges_and_ledger_replays() {
    let (pool, db_name) = create_test_db().await;
    let manager = ProjectManager::new(WorkflowStore::new(pool.clone()));
    let id = manager.create("meta", json!({"a": 1})).await.unwrap();

    let updated = manager.update_metadata(id, &json!({"b": 2})).await.unwrap();
    assert_eq!(updated.metadata, json!({"a": 1, "b": 2}));

    let ledger = Arc::new(CostLedger::new(id, pool.clone()));
    for i in 0..3 {
        ledger
            .record(
                CostCall::new("writer", "incorporating", "model-a")
                    .cost(0.002)
                    .iteration(i + 1)
                    .section(0),
            )
            .await;
    }

    let replayed = manager.cost_ledger(id).await.unwrap();
    let live = ledger.summary(5);
    let rebuilt = replayed.summary(5);
    assert_eq!(rebuilt.total_calls, live.total_calls);
    assert!((rebuilt.total_cost - live.total_cost).abs() < 1e-9);
    assert_eq!(rebuilt.by_section.keys().collect::<Vec<_>>(), vec!["section_0"]);
    assert_eq!(
        rebuilt.iteration_costs.get("writer.incorporating").unwrap().iterations,
        3
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
