//! Lock-guarded writes over the persistence layer.
//!
//! [`WorkflowStore`] is what the engine writes through. Every write that
//! touches a project's ordered state (sections, milestones) holds that
//! project's lock from [`ProjectLocks`] for its whole duration.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use scribe_db::StoreResult;
use scribe_db::models::{Milestone, MilestoneType, NewSection, Section, SectionStatus};
use scribe_db::queries::sections::SectionUpdate;
use scribe_db::queries::{milestones, projects, sections};

use crate::locks::ProjectLocks;
use crate::refine::SectionSink;

/// Pool plus per-project locks. Cheap to clone; clones share the locks.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    pool: PgPool,
    locks: Arc<ProjectLocks>,
}

impl WorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            locks: Arc::new(ProjectLocks::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn locks(&self) -> &Arc<ProjectLocks> {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // Sections
    // -----------------------------------------------------------------------

    /// Atomically replace the project's whole section set.
    pub async fn save_sections(
        &self,
        project_id: Uuid,
        new_sections: &[NewSection],
    ) -> StoreResult<Vec<Section>> {
        let _guard = self.locks.acquire(project_id).await;
        let written = sections::replace_sections(&self.pool, project_id, new_sections).await?;
        debug!(project_id = %project_id, count = written.len(), "sections replaced");
        Ok(written)
    }

    pub async fn load_sections(&self, project_id: Uuid) -> StoreResult<Vec<Section>> {
        sections::load_sections(&self.pool, project_id).await
    }

    /// Update one section's status and, optionally, its content and usage.
    pub async fn update_section_status(
        &self,
        project_id: Uuid,
        section_index: i32,
        status: SectionStatus,
        update: &SectionUpdate,
    ) -> StoreResult<Section> {
        let _guard = self.locks.acquire(project_id).await;
        let section =
            sections::update_section_status(&self.pool, project_id, section_index, status, update)
                .await?;
        debug!(
            project_id = %project_id,
            section_index,
            status = %status,
            "section status updated"
        );
        Ok(section)
    }

    /// Write one finished section without disturbing its siblings.
    pub async fn upsert_section(
        &self,
        project_id: Uuid,
        section: &NewSection,
    ) -> StoreResult<Section> {
        let _guard = self.locks.acquire(project_id).await;
        let written = sections::upsert_section(&self.pool, project_id, section).await?;
        projects::touch_project(&self.pool, project_id).await?;
        Ok(written)
    }

    // -----------------------------------------------------------------------
    // Milestones
    // -----------------------------------------------------------------------

    /// Append a milestone. A later write of the same type shadows this one.
    pub async fn save_milestone(
        &self,
        project_id: Uuid,
        milestone_type: MilestoneType,
        data: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> StoreResult<Milestone> {
        let _guard = self.locks.acquire(project_id).await;
        let milestone =
            milestones::insert_milestone(&self.pool, project_id, milestone_type, data, metadata)
                .await?;
        debug!(
            project_id = %project_id,
            milestone = %milestone_type,
            milestone_id = milestone.id,
            "milestone saved"
        );
        Ok(milestone)
    }

    pub async fn load_milestone(
        &self,
        project_id: Uuid,
        milestone_type: MilestoneType,
    ) -> StoreResult<Option<Milestone>> {
        milestones::load_milestone(&self.pool, project_id, milestone_type).await
    }

    pub async fn latest_milestone(&self, project_id: Uuid) -> StoreResult<Option<Milestone>> {
        milestones::get_latest_milestone(&self.pool, project_id).await
    }

    /// Latest milestone of each reached type, in pipeline order.
    pub async fn latest_milestones(&self, project_id: Uuid) -> StoreResult<Vec<Milestone>> {
        milestones::list_latest_milestones(&self.pool, project_id).await
    }
}

#[async_trait]
impl SectionSink for WorkflowStore {
    async fn persist_section(&self, project_id: Uuid, section: NewSection) -> StoreResult<()> {
        self.upsert_section(project_id, &section).await?;
        Ok(())
    }
}
