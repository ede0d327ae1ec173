//! Migrations create every engine table and are idempotent.

use scribe_db::pool;
use scribe_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn fresh_database_has_empty_tables() {
    let (db, db_name) = create_test_db().await;

    let counts = pool::table_counts(&db).await.expect("tables should exist");
    let names: Vec<_> = counts.iter().map(|(t, _)| *t).collect();
    assert_eq!(names, pool::TABLES.to_vec());
    assert!(counts.iter().all(|(_, n)| *n == 0));

    // Running again is a no-op.
    pool::run_migrations(&db)
        .await
        .expect("second migration run should succeed");

    db.close().await;
    drop_test_db(&db_name).await;
}
