//! Query functions, one module per table.
//!
//! Functions are free `async fn`s over a [`sqlx::PgPool`]. Multi-statement
//! writes open their own transaction so readers never observe a partial
//! batch.

pub mod completed_blogs;
pub mod cost_records;
pub mod milestones;
pub mod projects;
pub mod sections;
