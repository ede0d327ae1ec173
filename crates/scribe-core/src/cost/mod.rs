//! The cost ledger.
//!
//! One [`CostLedger`] is created per workflow run and handed to every
//! operation that makes metered calls (via
//! [`crate::refine::GenerationContext`] inside the refinement loop).
//! Recording updates in-memory rollups and appends a `cost_records` row.
//! Recording never fails the measured call: if the database write fails the
//! ledger logs it and stays in-memory only for the rest of the run.

mod summary;

pub use summary::{
    CostBucket, CostShare, CostSummary, IterationCost, NodeCost, TimelinePoint, cost_timeline,
};

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use scribe_db::models::CostRecord;
use scribe_db::queries::cost_records::{self, NewCostRecord};

/// Calls costing more than this are logged at `warn`.
pub const HIGH_COST_THRESHOLD: f64 = 0.01;

/// Stage label used when a call does not name one.
pub const UNASSIGNED_STAGE: &str = "unassigned";

/// One metered call to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCall {
    pub agent: String,
    pub node: String,
    pub operation: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub iteration: Option<u32>,
    pub section_index: Option<i32>,
    pub stage: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CostCall {
    /// A call with no usage yet; `operation` defaults to `node`.
    pub fn new(agent: impl Into<String>, node: impl Into<String>, model: impl Into<String>) -> Self {
        let node = node.into();
        Self {
            agent: agent.into(),
            operation: node.clone(),
            node,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            iteration: None,
            section_index: None,
            stage: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn tokens(mut self, input: i64, output: i64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn section(mut self, section_index: i32) -> Self {
        self.section_index = Some(section_index);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// `agent.node`
    pub fn node_key(&self) -> String {
        format!("{}.{}", self.agent, self.node)
    }

    /// `agent.node_iter_N`, when the call belongs to a refinement iteration.
    pub fn iteration_key(&self) -> Option<String> {
        self.iteration
            .map(|n| format!("{}_iter_{n}", self.node_key()))
    }

    /// `section_N`, when the call belongs to a section.
    pub fn section_key(&self) -> Option<String> {
        self.section_index.map(|i| format!("section_{i}"))
    }

    fn stage_key(&self) -> &str {
        self.stage.as_deref().unwrap_or(UNASSIGNED_STAGE)
    }

    /// Persisted form. The rollup scope goes into `metadata` so the ledger
    /// can be rebuilt from storage with [`CostLedger::from_records`].
    fn to_record(&self) -> NewCostRecord {
        let mut metadata = match &self.metadata {
            serde_json::Value::Object(map) => map.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("extra".into(), other.clone());
                map
            }
        };
        metadata.insert("node".into(), json!(self.node));
        metadata.insert("stage".into(), json!(self.stage));
        metadata.insert("iteration".into(), json!(self.iteration));
        metadata.insert("section_index".into(), json!(self.section_index));

        NewCostRecord {
            agent_name: self.agent.clone(),
            operation: self.operation.clone(),
            model_used: self.model.clone(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost: self.cost,
            metadata: serde_json::Value::Object(metadata),
        }
    }

    /// Inverse of [`Self::to_record`]. Records written without scope
    /// metadata fall back to `operation` as the node.
    fn from_record(record: &CostRecord) -> Self {
        let meta = &record.metadata;
        let node = meta
            .get("node")
            .and_then(|v| v.as_str())
            .unwrap_or(&record.operation)
            .to_owned();
        Self {
            agent: record.agent_name.clone(),
            node,
            operation: record.operation.clone(),
            model: record.model_used.clone(),
            input_tokens: record.input_tokens,
            output_tokens: record.output_tokens,
            cost: record.cost,
            iteration: meta
                .get("iteration")
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok()),
            section_index: meta
                .get("section_index")
                .and_then(|v| v.as_i64())
                .and_then(|n| i32::try_from(n).ok()),
            stage: meta.get("stage").and_then(|v| v.as_str()).map(str::to_owned),
            metadata: meta.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Totals {
    overall: CostBucket,
    by_agent: BTreeMap<String, CostBucket>,
    by_stage: BTreeMap<String, CostBucket>,
    by_node: BTreeMap<String, CostBucket>,
    by_iteration: BTreeMap<String, CostBucket>,
    /// node key -> iteration numbers seen for it
    iterations_per_node: BTreeMap<String, BTreeMap<u32, CostBucket>>,
    by_section: BTreeMap<String, CostBucket>,
    by_model: BTreeMap<String, CostBucket>,
    last_call_at: Option<DateTime<Utc>>,
}

impl Totals {
    fn add(&mut self, call: &CostCall, at: DateTime<Utc>) {
        self.overall.add(call);
        self.by_agent.entry(call.agent.clone()).or_default().add(call);
        self.by_stage
            .entry(call.stage_key().to_owned())
            .or_default()
            .add(call);
        self.by_node.entry(call.node_key()).or_default().add(call);
        self.by_model.entry(call.model.clone()).or_default().add(call);
        if let (Some(key), Some(n)) = (call.iteration_key(), call.iteration) {
            self.by_iteration.entry(key).or_default().add(call);
            self.iterations_per_node
                .entry(call.node_key())
                .or_default()
                .entry(n)
                .or_default()
                .add(call);
        }
        if let Some(key) = call.section_key() {
            self.by_section.entry(key).or_default().add(call);
        }
        self.last_call_at = Some(self.last_call_at.map_or(at, |prev| prev.max(at)));
    }
}

/// Records metered calls for one project and produces rollups.
#[derive(Debug)]
pub struct CostLedger {
    project_id: Uuid,
    pool: Option<PgPool>,
    degraded: AtomicBool,
    started_at: DateTime<Utc>,
    totals: Mutex<Totals>,
}

impl CostLedger {
    /// A ledger that persists every call to `cost_records`.
    pub fn new(project_id: Uuid, pool: PgPool) -> Self {
        Self::build(project_id, Some(pool), Utc::now())
    }

    /// A ledger that only keeps in-memory rollups.
    pub fn in_memory(project_id: Uuid) -> Self {
        Self::build(project_id, None, Utc::now())
    }

    /// Rebuild rollups from persisted records. The result does not persist.
    pub fn from_records(project_id: Uuid, records: &[CostRecord]) -> Self {
        let started_at = records
            .iter()
            .map(|r| r.created_at)
            .min()
            .unwrap_or_else(Utc::now);
        let ledger = Self::build(project_id, None, started_at);
        {
            let mut totals = ledger.totals();
            for record in records {
                totals.add(&CostCall::from_record(record), record.created_at);
            }
        }
        ledger
    }

    fn build(project_id: Uuid, pool: Option<PgPool>, started_at: DateTime<Utc>) -> Self {
        Self {
            project_id,
            pool,
            degraded: AtomicBool::new(false),
            started_at,
            totals: Mutex::new(Totals::default()),
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// `true` once a persistence failure switched the ledger to
    /// in-memory-only mode.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// `true` while calls are still being written to the database.
    pub fn is_persistent(&self) -> bool {
        self.pool.is_some() && !self.is_degraded()
    }

    /// Record one call. Never fails.
    pub async fn record(&self, call: CostCall) {
        let now = Utc::now();
        self.totals().add(&call, now);

        if call.cost > HIGH_COST_THRESHOLD {
            warn!(
                project_id = %self.project_id,
                agent = %call.agent,
                node = %call.node,
                model = %call.model,
                cost = call.cost,
                "high-cost call"
            );
        } else {
            debug!(
                project_id = %self.project_id,
                node = %call.node_key(),
                cost = call.cost,
                "cost recorded"
            );
        }

        let Some(pool) = &self.pool else {
            return;
        };
        if self.is_degraded() {
            return;
        }
        if let Err(e) =
            cost_records::insert_cost_record(pool, self.project_id, &call.to_record()).await
        {
            self.degraded.store(true, Ordering::Relaxed);
            warn!(
                project_id = %self.project_id,
                error = %e,
                "failed to persist cost record; continuing in memory only"
            );
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.totals().overall.cost
    }

    /// Usage attributed to one section so far.
    pub fn section_usage(&self, section_index: i32) -> CostBucket {
        self.totals()
            .by_section
            .get(&format!("section_{section_index}"))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every rollup. `top_n` bounds [`CostSummary::top_nodes`].
    pub fn summary(&self, top_n: usize) -> CostSummary {
        let totals = self.totals();
        let duration = totals
            .last_call_at
            .map(|last| (last - self.started_at).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        CostSummary::build(&totals, top_n, duration)
    }

    fn totals(&self) -> std::sync::MutexGuard<'_, Totals> {
        // Totals are plain sums; a poisoned guard still holds usable data.
        self.totals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
