//! Rollup types produced by [`super::CostLedger::summary`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scribe_db::models::CostRecord;

use super::{CostCall, Totals};

/// Guards percentage math against an all-zero ledger.
const MIN_TOTAL: f64 = 1e-6;

/// Running sums for one rollup key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBucket {
    pub cost: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub calls: u64,
}

impl CostBucket {
    pub(super) fn add(&mut self, call: &CostCall) {
        self.cost += call.cost;
        self.input_tokens += call.input_tokens;
        self.output_tokens += call.output_tokens;
        self.calls += 1;
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// A bucket plus its share of the overall cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostShare {
    pub cost: f64,
    pub percentage: f64,
    pub calls: u64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCost {
    pub node: String,
    pub cost: f64,
    pub calls: u64,
}

/// Refinement-loop cost for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationCost {
    pub iterations: usize,
    pub total_cost: f64,
    pub average_cost_per_iteration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_calls: u64,
    pub average_cost_per_call: f64,
    pub duration_seconds: f64,
    pub by_agent: BTreeMap<String, CostShare>,
    pub by_stage: BTreeMap<String, CostShare>,
    pub by_node: BTreeMap<String, CostBucket>,
    pub by_section: BTreeMap<String, CostBucket>,
    pub by_model: BTreeMap<String, CostBucket>,
    /// Most expensive nodes first.
    pub top_nodes: Vec<NodeCost>,
    /// Keyed by node (`agent.node`); only nodes that ran in an iteration.
    pub iteration_costs: BTreeMap<String, IterationCost>,
}

impl CostSummary {
    pub(super) fn build(totals: &Totals, top_n: usize, duration_seconds: f64) -> Self {
        let overall = &totals.overall;
        let share = |buckets: &BTreeMap<String, CostBucket>| -> BTreeMap<String, CostShare> {
            buckets
                .iter()
                .map(|(key, b)| {
                    let share = CostShare {
                        cost: b.cost,
                        percentage: percentage(b.cost, overall.cost),
                        calls: b.calls,
                        input_tokens: b.input_tokens,
                        output_tokens: b.output_tokens,
                    };
                    (key.clone(), share)
                })
                .collect()
        };

        let mut top_nodes: Vec<NodeCost> = totals
            .by_node
            .iter()
            .map(|(node, b)| NodeCost {
                node: node.clone(),
                cost: b.cost,
                calls: b.calls,
            })
            .collect();
        top_nodes.sort_by(|a, b| b.cost.total_cmp(&a.cost).then_with(|| a.node.cmp(&b.node)));
        top_nodes.truncate(top_n);

        let iteration_costs = totals
            .iterations_per_node
            .iter()
            .map(|(node, iterations)| {
                let total: f64 = iterations.values().map(|b| b.cost).sum();
                let count = iterations.len();
                let cost = IterationCost {
                    iterations: count,
                    total_cost: total,
                    average_cost_per_iteration: if count == 0 {
                        0.0
                    } else {
                        total / count as f64
                    },
                };
                (node.clone(), cost)
            })
            .collect();

        Self {
            total_cost: overall.cost,
            total_input_tokens: overall.input_tokens,
            total_output_tokens: overall.output_tokens,
            total_calls: overall.calls,
            average_cost_per_call: if overall.calls == 0 {
                0.0
            } else {
                overall.cost / overall.calls as f64
            },
            duration_seconds,
            by_agent: share(&totals.by_agent),
            by_stage: share(&totals.by_stage),
            by_node: totals.by_node.clone(),
            by_section: totals.by_section.clone(),
            by_model: totals.by_model.clone(),
            top_nodes,
            iteration_costs,
        }
    }
}

/// Percentage of `total`, rounded to two decimals.
fn percentage(part: f64, total: f64) -> f64 {
    let pct = part / total.max(MIN_TOTAL) * 100.0;
    (pct * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// One point of the cumulative cost curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub at: DateTime<Utc>,
    pub agent: String,
    pub operation: String,
    pub cost: f64,
    pub cumulative_cost: f64,
}

/// Cumulative cost over time, in recording order.
pub fn cost_timeline(records: &[CostRecord]) -> Vec<TimelinePoint> {
    let mut sorted: Vec<&CostRecord> = records.iter().collect();
    sorted.sort_by_key(|r| (r.created_at, r.id));

    let mut running = 0.0;
    sorted
        .into_iter()
        .map(|r| {
            running += r.cost;
            TimelinePoint {
                at: r.created_at,
                agent: r.agent_name.clone(),
                operation: r.operation.clone(),
                cost: r.cost,
                cumulative_cost: running,
            }
        })
        .collect()
}
