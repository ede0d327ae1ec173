//! Database query functions for the `sections` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{NewSection, Section, SectionStatus};

/// Replace the project's full section set.
///
/// The previous set is deleted and the new one inserted inside a single
/// transaction, so concurrent readers see either the old set or the new
/// set, never a mixture. Returns [`StoreError::NotFound`] for an unknown
/// project.
pub async fn replace_sections(
    pool: &PgPool,
    project_id: Uuid,
    sections: &[NewSection],
) -> StoreResult<Vec<Section>> {
    let mut tx = pool.begin().await?;

    // Locks the project row, which also orders concurrent replaces that
    // bypass the in-process lock.
    let touched = sqlx::query("UPDATE projects SET updated_at = now() WHERE id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(StoreError::not_found("project", project_id));
    }

    sqlx::query("DELETE FROM sections WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    let mut written = Vec::with_capacity(sections.len());
    for section in sections {
        let row = sqlx::query_as::<_, Section>(
            "INSERT INTO sections \
             (project_id, section_index, title, content, status, cost_delta, input_tokens, output_tokens) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING *",
        )
        .bind(project_id)
        .bind(section.section_index)
        .bind(&section.title)
        .bind(&section.content)
        .bind(section.status)
        .bind(section.cost_delta)
        .bind(section.input_tokens)
        .bind(section.output_tokens)
        .fetch_one(&mut *tx)
        .await?;
        written.push(row);
    }

    tx.commit().await?;
    written.sort_by_key(|s| s.section_index);
    Ok(written)
}

/// Insert or overwrite one section by `(project_id, section_index)`.
/// Sibling sections are untouched.
pub async fn upsert_section(
    pool: &PgPool,
    project_id: Uuid,
    section: &NewSection,
) -> StoreResult<Section> {
    let row = sqlx::query_as::<_, Section>(
        "INSERT INTO sections \
         (project_id, section_index, title, content, status, cost_delta, input_tokens, output_tokens) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         ON CONFLICT (project_id, section_index) DO UPDATE SET \
             title = EXCLUDED.title, \
             content = EXCLUDED.content, \
             status = EXCLUDED.status, \
             cost_delta = EXCLUDED.cost_delta, \
             input_tokens = EXCLUDED.input_tokens, \
             output_tokens = EXCLUDED.output_tokens, \
             updated_at = now() \
         RETURNING *",
    )
    .bind(project_id)
    .bind(section.section_index)
    .bind(&section.title)
    .bind(&section.content)
    .bind(section.status)
    .bind(section.cost_delta)
    .bind(section.input_tokens)
    .bind(section.output_tokens)
    .fetch_one(pool)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => {
            StoreError::not_found("project", project_id)
        }
        other => other.into(),
    })?;

    Ok(row)
}

/// All sections of a project, ordered by index.
pub async fn load_sections(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Section>> {
    let sections = sqlx::query_as::<_, Section>(
        "SELECT * FROM sections WHERE project_id = $1 ORDER BY section_index",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(sections)
}

/// Changes applied by [`update_section_status`]. `None` fields keep their
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct SectionUpdate {
    pub content: Option<String>,
    pub cost_delta: Option<f64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

/// Set one section's status (and optionally its content and usage figures)
/// without touching any other section.
pub async fn update_section_status(
    pool: &PgPool,
    project_id: Uuid,
    section_index: i32,
    status: SectionStatus,
    update: &SectionUpdate,
) -> StoreResult<Section> {
    sqlx::query_as::<_, Section>(
        "UPDATE sections SET \
             status = $3, \
             content = COALESCE($4, content), \
             cost_delta = COALESCE($5, cost_delta), \
             input_tokens = COALESCE($6, input_tokens), \
             output_tokens = COALESCE($7, output_tokens), \
             updated_at = now() \
         WHERE project_id = $1 AND section_index = $2 \
         RETURNING *",
    )
    .bind(project_id)
    .bind(section_index)
    .bind(status)
    .bind(update.content.as_deref())
    .bind(update.cost_delta)
    .bind(update.input_tokens)
    .bind(update.output_tokens)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::not_found("section", format!("{project_id}#{section_index}")))
}

/// Completed and total section counts for a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionCounts {
    pub completed: i64,
    pub total: i64,
}

pub async fn section_counts(pool: &PgPool, project_id: Uuid) -> StoreResult<SectionCounts> {
    let (completed, total): (i64, i64) = sqlx::query_as(
        "SELECT \
             COUNT(*) FILTER (WHERE status = 'completed'), \
             COUNT(*) \
         FROM sections WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    Ok(SectionCounts { completed, total })
}
