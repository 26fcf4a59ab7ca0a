//! Task repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskPriority, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub workflow_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
}

/// Repository interface for Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a new task.
    async fn create(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Update an existing task.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// List tasks with optional filters, newest first.
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Get tasks by status.
    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>>;

    /// All tasks in a workflow.
    async fn list_by_workflow(&self, workflow_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Queued tasks in queue order (boost desc, priority desc, queued_at asc).
    async fn list_queued(&self) -> DomainResult<Vec<Task>>;

    /// Non-terminal tasks with embeddings in the given phase (None matches
    /// phaseless tasks). Used for phase-scoped duplicate detection.
    async fn list_embedded_in_phase(&self, phase_id: Option<Uuid>) -> DomainResult<Vec<Task>>;

    /// Tasks with a ticket in a reconcilable status, for blocking sync.
    async fn list_for_blocking_sync(&self) -> DomainResult<Vec<Task>>;

    /// Tasks linked to a ticket with the given status.
    async fn list_by_ticket_status(
        &self,
        ticket_id: Uuid,
        status: TaskStatus,
    ) -> DomainResult<Vec<Task>>;

    /// Overwrite queue positions in one transaction: (task_id, 1-based rank).
    async fn set_queue_positions(&self, positions: &[(Uuid, i64)]) -> DomainResult<()>;
}
