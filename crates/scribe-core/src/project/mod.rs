//! Project lifecycle, progress, resume and export.

mod export;
mod progress;

pub use export::ExportFormat;
pub use progress::{NextStep, Progress};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use scribe_db::StoreError;
use scribe_db::models::{
    CompletedBlog, Milestone, MilestoneType, Project, ProjectStatus, Section, SectionStatus,
};
use scribe_db::queries::completed_blogs::{self, NewCompletedBlog};
use scribe_db::queries::{cost_records, milestones, projects, sections};

use crate::cost::{CostLedger, CostSummary};
use crate::error::WorkflowResult;
use crate::store::WorkflowStore;

/// Nodes listed in [`CostSummary::top_nodes`] of a resume snapshot.
pub const RESUME_TOP_NODES: usize = 5;

/// Everything needed to pick a project back up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    pub project: Project,
    /// Latest milestone of each reached type, in pipeline order.
    pub milestones: Vec<Milestone>,
    /// Most recently written milestone of any type.
    pub latest_milestone: Option<Milestone>,
    pub sections: Vec<Section>,
    pub cost_summary: CostSummary,
    pub progress: Progress,
    pub completed_blog: Option<CompletedBlog>,
    pub next_step: NextStep,
}

impl ResumeState {
    pub fn milestone(&self, milestone_type: MilestoneType) -> Option<&Milestone> {
        self.milestones
            .iter()
            .find(|m| m.milestone_type == milestone_type)
    }
}

/// Project-level operations over a [`WorkflowStore`].
#[derive(Debug, Clone)]
pub struct ProjectManager {
    store: WorkflowStore,
}

impl ProjectManager {
    pub fn new(store: WorkflowStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create an active project and return its id.
    ///
    /// Fails with [`StoreError::DuplicateName`] while another non-deleted
    /// project holds `name`.
    pub async fn create(&self, name: &str, metadata: serde_json::Value) -> WorkflowResult<Uuid> {
        let metadata = if metadata.is_null() {
            serde_json::json!({})
        } else {
            metadata
        };
        let project = projects::insert_project(self.store.pool(), name, &metadata).await?;
        info!(project_id = %project.id, name = %project.name, "project created");
        Ok(project.id)
    }

    pub async fn get(&self, project_id: Uuid) -> WorkflowResult<Project> {
        Ok(projects::get_project(self.store.pool(), project_id)
            .await?
            .ok_or_else(|| StoreError::not_found("project", project_id))?)
    }

    pub async fn get_by_name(&self, name: &str) -> WorkflowResult<Project> {
        Ok(projects::get_project_by_name(self.store.pool(), name)
            .await?
            .ok_or_else(|| StoreError::not_found("project", name))?)
    }

    /// Projects with `status`, or every non-deleted project, most recently
    /// updated first.
    pub async fn list(&self, status: Option<ProjectStatus>) -> WorkflowResult<Vec<Project>> {
        Ok(projects::list_projects(self.store.pool(), status).await?)
    }

    pub async fn archive(&self, project_id: Uuid) -> WorkflowResult<Project> {
        let project = projects::archive_project(self.store.pool(), project_id).await?;
        info!(project_id = %project_id, "project archived");
        Ok(project)
    }

    /// Soft-delete, or with `permanent` remove the project and every row
    /// that belongs to it.
    pub async fn delete(&self, project_id: Uuid, permanent: bool) -> WorkflowResult<()> {
        // Wait out in-flight compound writes before removing rows under them.
        let guard = self.store.locks().acquire(project_id).await;
        if permanent {
            projects::purge_project(self.store.pool(), project_id).await?;
        } else {
            projects::soft_delete_project(self.store.pool(), project_id).await?;
        }
        drop(guard);
        info!(project_id = %project_id, permanent, "project deleted");

        if permanent {
            // A purged id never writes again; its registry entry can go.
            let pruned = self.store.locks().prune();
            debug!(project_id = %project_id, pruned, "lock registry pruned");
        }
        Ok(())
    }

    /// Merge `patch` into the project's metadata.
    pub async fn update_metadata(
        &self,
        project_id: Uuid,
        patch: &serde_json::Value,
    ) -> WorkflowResult<Project> {
        Ok(projects::update_metadata(self.store.pool(), project_id, patch).await?)
    }

    // -----------------------------------------------------------------------
    // Milestones
    // -----------------------------------------------------------------------

    pub async fn save_milestone(
        &self,
        project_id: Uuid,
        milestone_type: MilestoneType,
        data: serde_json::Value,
        metadata: serde_json::Value,
    ) -> WorkflowResult<Milestone> {
        let milestone = self
            .store
            .save_milestone(project_id, milestone_type, &data, &metadata)
            .await?;
        info!(project_id = %project_id, milestone = %milestone_type, "milestone recorded");
        Ok(milestone)
    }

    pub async fn load_milestone(
        &self,
        project_id: Uuid,
        milestone_type: MilestoneType,
    ) -> WorkflowResult<Option<Milestone>> {
        Ok(self.store.load_milestone(project_id, milestone_type).await?)
    }

    pub async fn latest_milestone(&self, project_id: Uuid) -> WorkflowResult<Option<Milestone>> {
        Ok(self.store.latest_milestone(project_id).await?)
    }

    // -----------------------------------------------------------------------
    // Progress, resume, export
    // -----------------------------------------------------------------------

    pub async fn progress(&self, project_id: Uuid) -> WorkflowResult<Progress> {
        // Resolve the project first so unknown ids are NotFound, not 0%.
        self.get(project_id).await?;
        let reached = milestones::count_milestone_types(self.store.pool(), project_id).await?;
        let counts = sections::section_counts(self.store.pool(), project_id).await?;
        Ok(Progress::compute(reached as usize, counts.completed, counts.total))
    }

    /// Rebuild the cost ledger of a project from its persisted records.
    pub async fn cost_ledger(&self, project_id: Uuid) -> WorkflowResult<CostLedger> {
        let records = cost_records::list_cost_records(self.store.pool(), project_id).await?;
        Ok(CostLedger::from_records(project_id, &records))
    }

    pub async fn cost_summary(&self, project_id: Uuid, top_n: usize) -> WorkflowResult<CostSummary> {
        Ok(self.cost_ledger(project_id).await?.summary(top_n))
    }

    /// Assemble the full resume snapshot of a project.
    pub async fn resume(&self, project_id: Uuid) -> WorkflowResult<ResumeState> {
        let project = self.get(project_id).await?;
        let milestones = self.store.latest_milestones(project_id).await?;
        let latest_milestone = self.store.latest_milestone(project_id).await?;
        let sections = self.store.load_sections(project_id).await?;
        let cost_summary = self.cost_summary(project_id, RESUME_TOP_NODES).await?;
        let completed_blog =
            completed_blogs::get_completed_blog(self.store.pool(), project_id).await?;

        let reached: Vec<MilestoneType> = milestones.iter().map(|m| m.milestone_type).collect();
        let completed = sections
            .iter()
            .filter(|s| s.status == SectionStatus::Completed)
            .count() as i64;
        let progress = Progress::compute(reached.len(), completed, sections.len() as i64);
        let next_step = NextStep::from_reached(&reached);

        info!(
            project_id = %project_id,
            next_step = %next_step,
            progress = progress.percentage,
            "project resumed"
        );

        Ok(ResumeState {
            project,
            milestones,
            latest_milestone,
            sections,
            cost_summary,
            progress,
            completed_blog,
            next_step,
        })
    }

    pub async fn export(&self, project_id: Uuid, format: ExportFormat) -> WorkflowResult<String> {
        let state = self.resume(project_id).await?;
        export::render(&state, format)
    }

    /// Save (or re-save with a bumped version) the final blog. Also marks
    /// the project completed.
    pub async fn save_completed_blog(
        &self,
        project_id: Uuid,
        blog: &NewCompletedBlog,
    ) -> WorkflowResult<CompletedBlog> {
        let saved = completed_blogs::save_completed_blog(self.store.pool(), project_id, blog).await?;
        info!(project_id = %project_id, version = saved.version, "completed blog saved");
        Ok(saved)
    }

    pub async fn completed_blog(&self, project_id: Uuid) -> WorkflowResult<Option<CompletedBlog>> {
        Ok(completed_blogs::get_completed_blog(self.store.pool(), project_id).await?)
    }
}
