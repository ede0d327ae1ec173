//! Durable storage for scribe projects, milestones, sections, cost records
//! and completed blogs.

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use error::{StoreError, StoreResult};
