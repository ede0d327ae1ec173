//! Database query functions for the `completed_blogs` table.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::CompletedBlog;

/// Fields for saving the final blog of a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCompletedBlog {
    pub title: String,
    pub final_content: String,
    pub word_count: i32,
    pub total_cost: f64,
    pub generation_time_seconds: f64,
    pub metadata: serde_json::Value,
}

/// Save the completed blog and mark the project completed.
///
/// The first save creates version 1; every later save overwrites the
/// content and increments `version`. Both writes share one transaction.
pub async fn save_completed_blog(
    pool: &PgPool,
    project_id: Uuid,
    blog: &NewCompletedBlog,
) -> StoreResult<CompletedBlog> {
    let mut tx = pool.begin().await?;

    let marked = sqlx::query(
        "UPDATE projects SET completed_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(project_id)
    .execute(&mut *tx)
    .await?;
    if marked.rows_affected() == 0 {
        return Err(StoreError::not_found("project", project_id));
    }

    let row = sqlx::query_as::<_, CompletedBlog>(
        "INSERT INTO completed_blogs \
         (project_id, title, final_content, word_count, total_cost, generation_time_seconds, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (project_id) DO UPDATE SET \
             title = EXCLUDED.title, \
             final_content = EXCLUDED.final_content, \
             word_count = EXCLUDED.word_count, \
             total_cost = EXCLUDED.total_cost, \
             generation_time_seconds = EXCLUDED.generation_time_seconds, \
             metadata = EXCLUDED.metadata, \
             version = completed_blogs.version + 1, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(project_id)
    .bind(&blog.title)
    .bind(&blog.final_content)
    .bind(blog.word_count)
    .bind(blog.total_cost)
    .bind(blog.generation_time_seconds)
    .bind(&blog.metadata)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// The completed blog of a project, if one was saved.
pub async fn get_completed_blog(
    pool: &PgPool,
    project_id: Uuid,
) -> StoreResult<Option<CompletedBlog>> {
    let row = sqlx::query_as::<_, CompletedBlog>(
        "SELECT * FROM completed_blogs WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
