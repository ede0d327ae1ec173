//! Integration tests for project, milestone and completed-blog queries.
//!
//! Each test creates its own temporary database (see `scribe-test-utils`)
//! and drops it on completion.

use serde_json::json;
use uuid::Uuid;

use scribe_db::StoreError;
use scribe_db::models::{MilestoneType, ProjectStatus};
use scribe_db::queries::completed_blogs::{self, NewCompletedBlog};
use scribe_db::queries::cost_records::{self, NewCostRecord};
use scribe_db::queries::{milestones, projects, sections};
use scribe_db::models::NewSection;
use scribe_test_utils::{create_test_db, drop_test_db};

// -----------------------------------------------------------------------
// Projects
// -----------------------------------------------------------------------

#[tokio::test]
async fn insert_and_get_project() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "rust-intro", &json!({"author": "sam"}))
        .await
        .expect("insert_project should succeed");

    assert_eq!(project.name, "rust-intro");
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.metadata["author"], "sam");
    assert!(project.archived_at.is_none());
    assert!(project.completed_at.is_none());

    let fetched = projects::get_project(&pool, project.id)
        .await
        .unwrap()
        .expect("project should exist");
    assert_eq!(fetched.id, project.id);

    let by_name = projects::get_project_by_name(&pool, "rust-intro")
        .await
        .unwrap()
        .expect("project should be found by name");
    assert_eq!(by_name.id, project.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn duplicate_name_is_rejected_until_deleted() {
    let (pool, db_name) = create_test_db().await;

    let first = projects::insert_project(&pool, "dup", &json!({}))
        .await
        .unwrap();

    let err = projects::insert_project(&pool, "dup", &json!({}))
        .await
        .expect_err("second insert should fail");
    assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "dup"));

    // Archived projects still hold their name.
    projects::archive_project(&pool, first.id).await.unwrap();
    assert!(matches!(
        projects::insert_project(&pool, "dup", &json!({})).await,
        Err(StoreError::DuplicateName(_))
    ));

    // Soft-deleted ones release it.
    projects::soft_delete_project(&pool, first.id).await.unwrap();
    let second = projects::insert_project(&pool, "dup", &json!({}))
        .await
        .expect("name should be free after soft delete");
    assert_ne!(second.id, first.id);

    // The deleted row stays deleted; archiving it would clash with the
    // live project that now owns the name.
    let err = projects::archive_project(&pool, first.id)
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
    let live = projects::get_project_by_name(&pool, "dup").await.unwrap();
    assert_eq!(live.map(|p| p.id), Some(second.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn archive_sets_timestamp_and_status() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "to-archive", &json!({}))
        .await
        .unwrap();
    let archived = projects::archive_project(&pool, project.id).await.unwrap();

    assert_eq!(archived.status, ProjectStatus::Archived);
    assert!(archived.archived_at.is_some());

    let err = projects::archive_project(&pool, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_projects_filters_and_orders_by_update() {
    let (pool, db_name) = create_test_db().await;

    let a = projects::insert_project(&pool, "a", &json!({})).await.unwrap();
    let b = projects::insert_project(&pool, "b", &json!({})).await.unwrap();
    let c = projects::insert_project(&pool, "c", &json!({})).await.unwrap();
    projects::archive_project(&pool, b.id).await.unwrap();
    projects::soft_delete_project(&pool, c.id).await.unwrap();
    projects::touch_project(&pool, a.id).await.unwrap();

    let live = projects::list_projects(&pool, None).await.unwrap();
    let names: Vec<_> = live.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);

    let active = projects::list_projects(&pool, Some(ProjectStatus::Active))
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, a.id);

    let deleted = projects::list_projects(&pool, Some(ProjectStatus::Deleted))
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_metadata_merges_keys() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "meta", &json!({"a": 1, "b": 2}))
        .await
        .unwrap();
    let updated = projects::update_metadata(&pool, project.id, &json!({"b": 3, "c": 4}))
        .await
        .unwrap();

    assert_eq!(updated.metadata, json!({"a": 1, "b": 3, "c": 4}));
    assert!(updated.updated_at >= project.updated_at);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn purge_removes_dependent_rows() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "purge", &json!({}))
        .await
        .unwrap();
    milestones::insert_milestone(
        &pool,
        project.id,
        MilestoneType::FilesUploaded,
        &json!({"files": ["a.md"]}),
        &json!({}),
    )
    .await
    .unwrap();
    sections::replace_sections(&pool, project.id, &[NewSection::pending(0, "Intro")])
        .await
        .unwrap();
    cost_records::insert_cost_record(
        &pool,
        project.id,
        &NewCostRecord {
            agent_name: "writer".into(),
            operation: "generate".into(),
            model_used: "model-a".into(),
            input_tokens: 10,
            output_tokens: 20,
            cost: 0.001,
            metadata: json!({}),
        },
    )
    .await
    .unwrap();

    projects::purge_project(&pool, project.id).await.unwrap();

    assert!(projects::get_project(&pool, project.id).await.unwrap().is_none());
    assert!(
        milestones::list_milestone_history(&pool, project.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(sections::load_sections(&pool, project.id).await.unwrap().is_empty());
    assert!(
        cost_records::list_cost_records(&pool, project.id)
            .await
            .unwrap()
            .is_empty()
    );

    let err = projects::purge_project(&pool, project.id).await.unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Milestones
// -----------------------------------------------------------------------

#[tokio::test]
async fn milestone_latest_wins_per_type() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "latest", &json!({}))
        .await
        .unwrap();

    milestones::insert_milestone(
        &pool,
        project.id,
        MilestoneType::OutlineGenerated,
        &json!({"title": "first", "only_in_first": true}),
        &json!({}),
    )
    .await
    .unwrap();
    milestones::insert_milestone(
        &pool,
        project.id,
        MilestoneType::OutlineGenerated,
        &json!({"title": "second"}),
        &json!({}),
    )
    .await
    .unwrap();

    let loaded = milestones::load_milestone(&pool, project.id, MilestoneType::OutlineGenerated)
        .await
        .unwrap()
        .expect("milestone should exist");
    assert_eq!(loaded.data, json!({"title": "second"}));
    assert!(loaded.data.get("only_in_first").is_none());

    let history = milestones::list_milestone_history(&pool, project.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(
        milestones::count_milestone_types(&pool, project.id)
            .await
            .unwrap(),
        1
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn latest_milestone_spans_types() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "spans", &json!({}))
        .await
        .unwrap();

    for ty in [
        MilestoneType::OutlineGenerated,
        MilestoneType::FilesUploaded,
        MilestoneType::DraftCompleted,
    ] {
        milestones::insert_milestone(&pool, project.id, ty, &json!({"ty": ty}), &json!({}))
            .await
            .unwrap();
    }

    let latest = milestones::get_latest_milestone(&pool, project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.milestone_type, MilestoneType::DraftCompleted);

    let per_type = milestones::list_latest_milestones(&pool, project.id)
        .await
        .unwrap();
    let types: Vec<_> = per_type.iter().map(|m| m.milestone_type).collect();
    assert_eq!(
        types,
        vec![
            MilestoneType::FilesUploaded,
            MilestoneType::OutlineGenerated,
            MilestoneType::DraftCompleted,
        ]
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn milestone_for_unknown_project_is_not_found() {
    let (pool, db_name) = create_test_db().await;

    let err = milestones::insert_milestone(
        &pool,
        Uuid::new_v4(),
        MilestoneType::FilesUploaded,
        &json!({}),
        &json!({}),
    )
    .await
    .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

// -----------------------------------------------------------------------
// Completed blogs
// -----------------------------------------------------------------------

#[tokio::test]
async fn completed_blog_versions_increment() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "blog", &json!({}))
        .await
        .unwrap();
    let mut blog = NewCompletedBlog {
        title: "Ownership".into(),
        final_content: "first".into(),
        word_count: 1,
        total_cost: 0.5,
        generation_time_seconds: 12.0,
        metadata: json!({}),
    };

    let v1 = completed_blogs::save_completed_blog(&pool, project.id, &blog)
        .await
        .unwrap();
    assert_eq!(v1.version, 1);

    blog.final_content = "second take".into();
    blog.word_count = 2;
    let v2 = completed_blogs::save_completed_blog(&pool, project.id, &blog)
        .await
        .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.final_content, "second take");

    let stored = completed_blogs::get_completed_blog(&pool, project.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 2);

    let project = projects::get_project(&pool, project.id)
        .await
        .unwrap()
        .unwrap();
    assert!(project.completed_at.is_some());

    let err = completed_blogs::save_completed_blog(&pool, Uuid::new_v4(), &blog)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cost_records_are_listed_in_order_and_summed() {
    let (pool, db_name) = create_test_db().await;

    let project = projects::insert_project(&pool, "costs", &json!({}))
        .await
        .unwrap();
    for (i, cost) in [0.25, 0.5, 0.25].into_iter().enumerate() {
        cost_records::insert_cost_record(
            &pool,
            project.id,
            &NewCostRecord {
                agent_name: "writer".into(),
                operation: format!("call-{i}"),
                model_used: "model-a".into(),
                input_tokens: 100,
                output_tokens: 50,
                cost,
                metadata: json!({"node": "draft"}),
            },
        )
        .await
        .unwrap();
    }

    let rows = cost_records::list_cost_records(&pool, project.id)
        .await
        .unwrap();
    let ops: Vec<_> = rows.iter().map(|r| r.operation.as_str()).collect();
    assert_eq!(ops, vec!["call-0", "call-1", "call-2"]);

    let total = cost_records::total_cost(&pool, project.id).await.unwrap();
    assert!((total - 1.0).abs() < 1e-9);

    pool.close().await;
    drop_test_db(&db_name).await;
}
