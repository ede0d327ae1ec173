//! Database query functions for the `projects` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult, is_unique_violation};
use crate::models::{Project, ProjectStatus};

/// Insert a new active project.
///
/// Fails with [`StoreError::DuplicateName`] when a non-deleted project
/// already uses `name`.
pub async fn insert_project(
    pool: &PgPool,
    name: &str,
    metadata: &serde_json::Value,
) -> StoreResult<Project> {
    let result = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, metadata) \
         VALUES ($1, $2) \
         RETURNING *",
    )
    .bind(name)
    .bind(metadata)
    .fetch_one(pool)
    .await;

    match result {
        Ok(project) => Ok(project),
        Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateName(name.to_owned())),
        Err(e) => Err(e.into()),
    }
}

/// Fetch a project by its ID, regardless of status.
pub async fn get_project(pool: &PgPool, id: Uuid) -> StoreResult<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(project)
}

/// Fetch a non-deleted project by name.
pub async fn get_project_by_name(pool: &PgPool, name: &str) -> StoreResult<Option<Project>> {
    let project = sqlx::query_as::<_, Project>(
        "SELECT * FROM projects WHERE name = $1 AND status <> 'deleted'",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(project)
}

/// List projects, most recently updated first.
///
/// With `status = None` every project except soft-deleted ones is returned.
pub async fn list_projects(
    pool: &PgPool,
    status: Option<ProjectStatus>,
) -> StoreResult<Vec<Project>> {
    let projects = match status {
        Some(status) => {
            sqlx::query_as::<_, Project>(
                "SELECT * FROM projects WHERE status = $1 ORDER BY updated_at DESC, created_at DESC",
            )
            .bind(status)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Project>(
                "SELECT * FROM projects WHERE status <> 'deleted' \
                 ORDER BY updated_at DESC, created_at DESC",
            )
            .fetch_all(pool)
            .await?
        }
    };

    Ok(projects)
}

/// Mark a project archived, stamping `archived_at`.
///
/// A soft-deleted project cannot be archived; it reports
/// [`StoreError::NotFound`] like an unknown id.
pub async fn archive_project(pool: &PgPool, id: Uuid) -> StoreResult<Project> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects \
         SET status = 'archived', archived_at = now(), updated_at = now() \
         WHERE id = $1 AND status <> 'deleted' \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::not_found("project", id))
}

/// Soft-delete a project. Its name becomes available again.
pub async fn soft_delete_project(pool: &PgPool, id: Uuid) -> StoreResult<Project> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects \
         SET status = 'deleted', updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::not_found("project", id))
}

/// Physically remove a project. Milestones, sections, cost records and the
/// completed blog go with it through cascading foreign keys.
pub async fn purge_project(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("project", id));
    }
    Ok(())
}

/// Shallow-merge `patch` into the project's metadata. Keys in `patch`
/// overwrite existing keys; other keys are kept.
pub async fn update_metadata(
    pool: &PgPool,
    id: Uuid,
    patch: &serde_json::Value,
) -> StoreResult<Project> {
    sqlx::query_as::<_, Project>(
        "UPDATE projects \
         SET metadata = metadata || $2, updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .bind(patch)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::not_found("project", id))
}

/// Bump `updated_at`. Returns [`StoreError::NotFound`] for an unknown id.
pub async fn touch_project(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    let result = sqlx::query("UPDATE projects SET updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("project", id));
    }
    Ok(())
}
