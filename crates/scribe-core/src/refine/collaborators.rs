//! Interfaces to the external services the loop depends on.
//!
//! Every trait is object-safe so implementations can be held as
//! `Arc<dyn Trait>` and shared across concurrently refined units.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use scribe_db::StoreResult;
use scribe_db::models::NewSection;

use super::types::{AuxiliaryArtifact, ContentReference, UnitSpec};
use crate::cost::{CostCall, CostLedger};

/// Cost-ledger stage label for everything the refinement loop spends.
pub const DRAFT_STAGE: &str = "draft";

/// Scope handed to collaborators so metered usage lands on the right
/// rollup keys.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub project_id: Uuid,
    pub section_index: i32,
    /// Loop state issuing the call, e.g. `enhancing`.
    pub node: &'static str,
    /// Validation pass the call belongs to, for loop states.
    pub iteration: Option<u32>,
    pub references: Arc<[ContentReference]>,
    pub ledger: Option<Arc<CostLedger>>,
}

impl GenerationContext {
    /// Record a metered call made on behalf of this context. A context
    /// without a ledger drops the call.
    pub async fn record_usage(
        &self,
        agent: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let mut call = CostCall::new(agent, self.node, model)
            .tokens(input_tokens, output_tokens)
            .cost(cost)
            .section(self.section_index)
            .stage(DRAFT_STAGE);
        if let Some(n) = self.iteration {
            call = call.iteration(n);
        }
        ledger.record(call).await;
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce the first draft of a unit.
    async fn generate(&self, spec: &UnitSpec, ctx: &GenerationContext) -> Result<String>;

    /// Produce an enhanced version of `text`.
    async fn enhance(&self, text: &str, ctx: &GenerationContext) -> Result<String>;

    /// Revise `text` according to `feedback`.
    async fn incorporate_feedback(
        &self,
        text: &str,
        feedback: &str,
        ctx: &GenerationContext,
    ) -> Result<String>;
}

#[async_trait]
pub trait QualityScorer: Send + Sync {
    /// Score `text`. The report is a JSON object of named metrics plus
    /// `overall_score`; anything else scores zero.
    async fn score(
        &self,
        text: &str,
        spec: &UnitSpec,
        ctx: &GenerationContext,
    ) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        filters: &serde_json::Value,
    ) -> Result<Vec<ContentReference>>;
}

#[async_trait]
pub trait AuxiliaryExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<AuxiliaryArtifact>>;
}

/// Where finalized units are written.
#[async_trait]
pub trait SectionSink: Send + Sync {
    async fn persist_section(&self, project_id: Uuid, section: NewSection) -> StoreResult<()>;
}

const _: () = {
    fn _assert_object_safe(
        _: &dyn ContentGenerator,
        _: &dyn QualityScorer,
        _: &dyn Retriever,
        _: &dyn AuxiliaryExtractor,
        _: &dyn SectionSink,
    ) {
    }
};

/// Retriever used when a pipeline has no source material to search.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReferences;

#[async_trait]
impl Retriever for NoReferences {
    async fn search(&self, _query: &str, _filters: &serde_json::Value) -> Result<Vec<ContentReference>> {
        Ok(Vec::new())
    }
}

/// Extractor that yields nothing. Use when content carries no artifacts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoArtifacts;

#[async_trait]
impl AuxiliaryExtractor for NoArtifacts {
    async fn extract(&self, _text: &str) -> Result<Vec<AuxiliaryArtifact>> {
        Ok(Vec::new())
    }
}
