//! Database query functions for the `milestones` table.
//!
//! Milestones are append-only. Every read resolves "latest wins" by the
//! monotonic row id, so a re-written milestone fully shadows the earlier
//! payload of the same type.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Milestone, MilestoneType};

/// Append a milestone and bump the project's `updated_at` in one statement.
///
/// Returns [`StoreError::NotFound`] when the project does not exist.
pub async fn insert_milestone(
    pool: &PgPool,
    project_id: Uuid,
    milestone_type: MilestoneType,
    data: &serde_json::Value,
    metadata: &serde_json::Value,
) -> StoreResult<Milestone> {
    sqlx::query_as::<_, Milestone>(
        "WITH touched AS ( \
             UPDATE projects SET updated_at = now() WHERE id = $1 RETURNING id \
         ) \
         INSERT INTO milestones (project_id, milestone_type, data, metadata) \
         SELECT id, $2, $3, $4 FROM touched \
         RETURNING *",
    )
    .bind(project_id)
    .bind(milestone_type)
    .bind(data)
    .bind(metadata)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::not_found("project", project_id))
}

/// The most recently written milestone of `milestone_type`.
pub async fn load_milestone(
    pool: &PgPool,
    project_id: Uuid,
    milestone_type: MilestoneType,
) -> StoreResult<Option<Milestone>> {
    let milestone = sqlx::query_as::<_, Milestone>(
        "SELECT * FROM milestones \
         WHERE project_id = $1 AND milestone_type = $2 \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .bind(project_id)
    .bind(milestone_type)
    .fetch_optional(pool)
    .await?;

    Ok(milestone)
}

/// The most recently written milestone of any type.
pub async fn get_latest_milestone(
    pool: &PgPool,
    project_id: Uuid,
) -> StoreResult<Option<Milestone>> {
    let milestone = sqlx::query_as::<_, Milestone>(
        "SELECT * FROM milestones WHERE project_id = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;

    Ok(milestone)
}

/// The latest milestone of each type present, in pipeline order.
pub async fn list_latest_milestones(
    pool: &PgPool,
    project_id: Uuid,
) -> StoreResult<Vec<Milestone>> {
    let mut milestones = sqlx::query_as::<_, Milestone>(
        "SELECT DISTINCT ON (milestone_type) * FROM milestones \
         WHERE project_id = $1 \
         ORDER BY milestone_type, id DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    milestones.sort_by_key(|m| m.milestone_type.ordinal());
    Ok(milestones)
}

/// Every milestone ever written for the project, oldest first.
pub async fn list_milestone_history(
    pool: &PgPool,
    project_id: Uuid,
) -> StoreResult<Vec<Milestone>> {
    let milestones = sqlx::query_as::<_, Milestone>(
        "SELECT * FROM milestones WHERE project_id = $1 ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(milestones)
}

/// Number of distinct milestone types the project has reached.
pub async fn count_milestone_types(pool: &PgPool, project_id: Uuid) -> StoreResult<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT milestone_type) FROM milestones WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}
