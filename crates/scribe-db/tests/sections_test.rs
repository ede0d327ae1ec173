//! Integration tests for the `sections` query module.

use serde_json::json;
use uuid::Uuid;

use scribe_db::models::{NewSection, SectionStatus};
use scribe_db::queries::sections::{self, SectionCounts, SectionUpdate};
use scribe_db::queries::projects;
use scribe_test_utils::{create_test_db, drop_test_db};

fn batch(count: i32, suffix: &str) -> Vec<NewSection> {
    (0..count)
        .map(|i| NewSection::pending(i, format!("section {i} {suffix}")))
        .collect()
}

#[tokio::test]
async fn replace_discards_previous_set() {
    let (pool, db_name) = create_test_db().await;
    let project = projects::insert_project(&pool, "replace", &json!({}))
        .await
        .unwrap();

    sections::replace_sections(&pool, project.id, &batch(5, "old"))
        .await
        .unwrap();
    let written = sections::replace_sections(&pool, project.id, &batch(2, "new"))
        .await
        .unwrap();
    assert_eq!(written.len(), 2);

    let loaded = sections::load_sections(&pool, project.id).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().all(|s| s.title.ends_with("new")));
    assert_eq!(loaded[0].section_index, 0);
    assert_eq!(loaded[1].section_index, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn replace_with_duplicate_index_leaves_previous_set() {
    let (pool, db_name) = create_test_db().await;
    let project = projects::insert_project(&pool, "atomic", &json!({}))
        .await
        .unwrap();

    sections::replace_sections(&pool, project.id, &batch(3, "keep"))
        .await
        .unwrap();

    let bad = vec![NewSection::pending(0, "x"), NewSection::pending(0, "y")];
    assert!(sections::replace_sections(&pool, project.id, &bad).await.is_err());

    let loaded = sections::load_sections(&pool, project.id).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|s| s.title.ends_with("keep")));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn replace_for_unknown_project_is_not_found() {
    let (pool, db_name) = create_test_db().await;

    let err = sections::replace_sections(&pool, Uuid::new_v4(), &batch(1, "x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_status_touches_one_section() {
    let (pool, db_name) = create_test_db().await;
    let project = projects::insert_project(&pool, "partial", &json!({}))
        .await
        .unwrap();
    sections::replace_sections(&pool, project.id, &batch(3, "s"))
        .await
        .unwrap();

    let updated = sections::update_section_status(
        &pool,
        project.id,
        1,
        SectionStatus::Completed,
        &SectionUpdate {
            content: Some("body".into()),
            cost_delta: Some(0.02),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.status, SectionStatus::Completed);
    assert_eq!(updated.content, "body");
    assert_eq!(updated.input_tokens, 0);

    let loaded = sections::load_sections(&pool, project.id).await.unwrap();
    assert_eq!(loaded[0].status, SectionStatus::Pending);
    assert_eq!(loaded[2].status, SectionStatus::Pending);
    assert!(loaded[0].content.is_empty());

    let counts = sections::section_counts(&pool, project.id).await.unwrap();
    assert_eq!(counts, SectionCounts { completed: 1, total: 3 });

    let err = sections::update_section_status(
        &pool,
        project.id,
        9,
        SectionStatus::Completed,
        &SectionUpdate::default(),
    )
    .await
    .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn upsert_overwrites_single_section() {
    let (pool, db_name) = create_test_db().await;
    let project = projects::insert_project(&pool, "upsert", &json!({}))
        .await
        .unwrap();
    sections::replace_sections(&pool, project.id, &batch(2, "s"))
        .await
        .unwrap();

    let finished = NewSection {
        section_index: 1,
        title: "Borrowing".into(),
        content: "final text".into(),
        status: SectionStatus::Completed,
        cost_delta: 0.1,
        input_tokens: 300,
        output_tokens: 900,
    };
    sections::upsert_section(&pool, project.id, &finished)
        .await
        .unwrap();

    let loaded = sections::load_sections(&pool, project.id).await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].title, "Borrowing");
    assert_eq!(loaded[1].output_tokens, 900);
    assert_eq!(loaded[0].title, "section 0 s");

    let err = sections::upsert_section(&pool, Uuid::new_v4(), &finished)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    pool.close().await;
    drop_test_db(&db_name).await;
}
