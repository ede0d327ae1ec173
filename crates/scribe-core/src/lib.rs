//! Workflow engine for staged content generation.
//!
//! - [`locks`]: per-project mutual exclusion for compound writes.
//! - [`store`]: lock-guarded writes over the `scribe-db` queries.
//! - [`cost`]: the cost ledger and its rollups.
//! - [`project`]: project lifecycle, progress, resume and export.
//! - [`refine`]: the bounded, quality-gated section refinement loop.
//! - [`pipeline`]: stage drivers tying the above together.

pub mod cost;
pub mod error;
pub mod locks;
pub mod pipeline;
pub mod project;
pub mod refine;
pub mod store;

pub use error::{WorkflowError, WorkflowResult};
