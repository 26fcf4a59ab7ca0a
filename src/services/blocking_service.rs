//! Ticket-derived task blocking.
//!
//! A task is blocked iff its ticket has unresolved blockers. Unblocking
//! always goes through `queued` (never `pending` — pending is not polled by
//! the queue loop).

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskStatus;
use crate::domain::ports::{TaskRepository, TicketRepository};

/// Result of a blocking check for one task.
#[derive(Debug, Clone, Default)]
pub struct BlockingInfo {
    pub is_blocked: bool,
    pub blocking_ticket_ids: Vec<Uuid>,
    pub blocker_titles: Vec<String>,
}

/// Outcome of a full blocking reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct BlockingSyncReport {
    pub tasks_blocked: usize,
    pub tasks_unblocked: usize,
    pub errors: usize,
    pub total_checked: usize,
}

/// Derives task runnable state from the ticket dependency graph.
pub struct TaskBlockingService {
    task_repo: Arc<dyn TaskRepository>,
    ticket_repo: Arc<dyn TicketRepository>,
}

impl TaskBlockingService {
    pub fn new(task_repo: Arc<dyn TaskRepository>, ticket_repo: Arc<dyn TicketRepository>) -> Self {
        Self { task_repo, ticket_repo }
    }

    /// Whether the task's ticket currently blocks it.
    pub async fn check(&self, task_id: Uuid) -> DomainResult<BlockingInfo> {
        let Some(task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for blocking check");
            return Ok(BlockingInfo::default());
        };

        let Some(ticket_id) = task.ticket_id else {
            return Ok(BlockingInfo::default());
        };

        let Some(ticket) = self.ticket_repo.get(ticket_id).await? else {
            tracing::warn!(%task_id, %ticket_id, "Task references a non-existent ticket");
            return Ok(BlockingInfo::default());
        };

        if ticket.blocked_by_ticket_ids.is_empty() {
            return Ok(BlockingInfo::default());
        }

        let blockers = self.ticket_repo.get_many(&ticket.blocked_by_ticket_ids).await?;
        Ok(BlockingInfo {
            is_blocked: true,
            blocking_ticket_ids: ticket.blocked_by_ticket_ids,
            blocker_titles: blockers.into_iter().map(|t| t.title).collect(),
        })
    }

    /// Set task status to blocked, storing the reason in completion_notes.
    pub async fn block(&self, task_id: Uuid, reason: Option<String>) -> DomainResult<()> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for blocking");
            return Ok(());
        };

        let old_status = task.status;
        task.force_status(TaskStatus::Blocked, "ticket blockers");
        task.queued_at = None;
        task.queue_position = None;
        if let Some(reason) = reason {
            task.completion_notes = Some(format!("Blocked: {reason}"));
        }
        self.task_repo.update(&task).await?;

        tracing::info!(
            %task_id,
            from = old_status.as_str(),
            "Task status changed to blocked"
        );
        Ok(())
    }

    /// Transition blocked → queued so the queue loop actually picks it up.
    pub async fn unblock(&self, task_id: Uuid) -> DomainResult<bool> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for unblocking");
            return Ok(false);
        };

        if task.status != TaskStatus::Blocked {
            tracing::warn!(%task_id, status = task.status.as_str(), "Task is not blocked");
            return Ok(false);
        }

        task.force_status(TaskStatus::Queued, "blockers resolved");
        task.queued_at = Some(Utc::now());
        if task
            .completion_notes
            .as_deref()
            .is_some_and(|n| n.starts_with("Blocked:"))
        {
            task.completion_notes = None;
        }
        self.task_repo.update(&task).await?;

        if let Err(e) =
            crate::services::queue_service::recalculate_queue_positions(self.task_repo.as_ref())
                .await
        {
            tracing::warn!(%task_id, error = %e, "Could not recalculate queue positions");
        }

        tracing::info!(%task_id, "Task unblocked and queued");
        Ok(true)
    }

    /// Ids of blocked tasks linked to a ticket.
    pub async fn blocked_tasks_for_ticket(&self, ticket_id: Uuid) -> DomainResult<Vec<Uuid>> {
        let tasks = self
            .task_repo
            .list_by_ticket_status(ticket_id, TaskStatus::Blocked)
            .await?;
        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    /// Reconcile every ticket-bearing task to its derived blocked state.
    pub async fn sync(&self) -> DomainResult<BlockingSyncReport> {
        let tasks = self.task_repo.list_for_blocking_sync().await?;
        let mut report = BlockingSyncReport {
            total_checked: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            let outcome = async {
                let blocking = self.check(task.id).await?;
                if blocking.is_blocked && task.status != TaskStatus::Blocked {
                    let reason = format!("Blocked by: {}", blocking.blocker_titles.join(", "));
                    self.block(task.id, Some(reason)).await?;
                    return DomainResult::Ok(Some(true));
                }
                if !blocking.is_blocked && task.status == TaskStatus::Blocked {
                    self.unblock(task.id).await?;
                    return Ok(Some(false));
                }
                Ok(None)
            }
            .await;

            match outcome {
                Ok(Some(true)) => report.tasks_blocked += 1,
                Ok(Some(false)) => report.tasks_unblocked += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Blocking sync failed for task");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            blocked = report.tasks_blocked,
            unblocked = report.tasks_unblocked,
            errors = report.errors,
            "Task blocking sync complete"
        );
        Ok(report)
    }
}
