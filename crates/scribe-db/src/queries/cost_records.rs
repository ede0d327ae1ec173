//! Database query functions for the `cost_records` table.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::CostRecord;

/// Fields for appending a cost record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCostRecord {
    pub agent_name: String,
    pub operation: String,
    pub model_used: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub metadata: serde_json::Value,
}

/// Append a cost record. Cost records are never updated.
pub async fn insert_cost_record(
    pool: &PgPool,
    project_id: Uuid,
    record: &NewCostRecord,
) -> StoreResult<CostRecord> {
    let row = sqlx::query_as::<_, CostRecord>(
        "INSERT INTO cost_records \
         (project_id, agent_name, operation, model_used, input_tokens, output_tokens, cost, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(&record.agent_name)
    .bind(&record.operation)
    .bind(&record.model_used)
    .bind(record.input_tokens)
    .bind(record.output_tokens)
    .bind(record.cost)
    .bind(&record.metadata)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All cost records of a project in recording order.
pub async fn list_cost_records(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<CostRecord>> {
    let rows = sqlx::query_as::<_, CostRecord>(
        "SELECT * FROM cost_records WHERE project_id = $1 ORDER BY id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Sum of all recorded cost for a project (0 when nothing was recorded).
pub async fn total_cost(pool: &PgPool, project_id: Uuid) -> StoreResult<f64> {
    let total: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(cost), 0)::float8 FROM cost_records WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    Ok(total)
}
