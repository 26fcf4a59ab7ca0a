//! Workflow repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Phase, ValidationReview, Workflow, WorkflowResult};

/// Repository interface for workflows, phases, results, and reviews.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn create_workflow(&self, workflow: &Workflow) -> DomainResult<()>;

    async fn get_workflow(&self, id: Uuid) -> DomainResult<Option<Workflow>>;

    async fn update_workflow(&self, workflow: &Workflow) -> DomainResult<()>;

    /// Workflows with status = active.
    async fn list_active_workflows(&self) -> DomainResult<Vec<Workflow>>;

    async fn create_phase(&self, phase: &Phase) -> DomainResult<()>;

    async fn get_phase(&self, id: Uuid) -> DomainResult<Option<Phase>>;

    async fn update_phase(&self, phase: &Phase) -> DomainResult<()>;

    /// Phases of a workflow in seq order.
    async fn list_phases(&self, workflow_id: Uuid) -> DomainResult<Vec<Phase>>;

    async fn create_result(&self, result: &WorkflowResult) -> DomainResult<()>;

    async fn get_result(&self, id: Uuid) -> DomainResult<Option<WorkflowResult>>;

    async fn update_result(&self, result: &WorkflowResult) -> DomainResult<()>;

    /// Results for a workflow, optionally filtered by status, newest first.
    async fn list_results(
        &self,
        workflow_id: Uuid,
        status: Option<&str>,
    ) -> DomainResult<Vec<WorkflowResult>>;

    async fn create_validation_review(&self, review: &ValidationReview) -> DomainResult<()>;

    async fn list_validation_reviews(&self, task_id: Uuid) -> DomainResult<Vec<ValidationReview>>;
}
