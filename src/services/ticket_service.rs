//! Ticket tracking: CRUD, board-validated transitions, blocking, resolution.
//!
//! Every mutation leaves a ticket_history audit row. A ticket with unresolved
//! blockers refuses status changes; resolving a ticket cascades, removing it
//! from dependents' blocker lists and unblocking their tasks once every
//! blocker is gone.

use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BoardConfig, CommentKind, Ticket, TicketCommitLink, TicketComment, TicketHistoryEntry,
    TicketPriority, WorkflowStatus,
};
use crate::domain::ports::{
    TicketRepository, TicketSearchHit, VectorIndex, WorkflowRepository,
};
use crate::services::blocking_service::TaskBlockingService;
use crate::services::embedding_service::EmbeddingService;

/// Parameters for creating a ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub workflow_id: Uuid,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub ticket_type: String,
    pub priority: TicketPriority,
    pub initial_status: Option<String>,
    pub parent_ticket_id: Option<Uuid>,
    pub blocked_by_ticket_ids: Vec<Uuid>,
    pub tags: Vec<String>,
}

/// Outcome of resolving a ticket.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    pub unblocked_tickets: Vec<Uuid>,
    pub unblocked_tasks: Vec<Uuid>,
}

/// Ticket service over the board-config rules.
pub struct TicketService {
    ticket_repo: Arc<dyn TicketRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    blocking: Arc<TaskBlockingService>,
    embeddings: Arc<EmbeddingService>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    main_repo_path: String,
}

impl TicketService {
    pub fn new(
        ticket_repo: Arc<dyn TicketRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        blocking: Arc<TaskBlockingService>,
        embeddings: Arc<EmbeddingService>,
        vector_index: Option<Arc<dyn VectorIndex>>,
        main_repo_path: String,
    ) -> Self {
        Self {
            ticket_repo,
            workflow_repo,
            blocking,
            embeddings,
            vector_index,
            main_repo_path,
        }
    }

    /// Create a ticket, validated against the workflow's board config.
    pub async fn create(&self, new: NewTicket) -> DomainResult<Ticket> {
        let workflow = self
            .workflow_repo
            .get_workflow(new.workflow_id)
            .await?
            .ok_or(DomainError::WorkflowNotFound(new.workflow_id))?;
        if !matches!(workflow.status, WorkflowStatus::Active | WorkflowStatus::Paused) {
            return Err(DomainError::InvalidArgument(format!(
                "Workflow is not active: {}",
                workflow.status.as_str()
            )));
        }

        let board = self
            .ticket_repo
            .get_board_config(new.workflow_id)
            .await?
            .ok_or_else(|| {
                DomainError::InvalidArgument(format!(
                    "Board configuration not found for workflow: {}",
                    new.workflow_id
                ))
            })?;

        if !board.is_valid_type(&new.ticket_type) {
            return Err(DomainError::InvalidArgument(format!(
                "Invalid ticket type '{}'. Allowed: {}",
                new.ticket_type,
                board.ticket_types.join(", ")
            )));
        }

        let status = match new.initial_status {
            Some(status) => {
                if !board.is_valid_status(&status) {
                    return Err(DomainError::InvalidArgument(format!(
                        "Invalid status '{status}'. Valid statuses: {}",
                        board.columns.join(", ")
                    )));
                }
                status
            }
            None => board.initial_status.clone(),
        };

        let mut ticket = Ticket::new(
            new.workflow_id,
            new.agent_id.clone(),
            new.title,
            new.description,
            new.ticket_type,
            new.priority,
            status,
        );
        ticket.parent_ticket_id = new.parent_ticket_id;
        ticket.tags = new.tags;

        if !new.blocked_by_ticket_ids.is_empty() {
            self.check_circular_blocking(ticket.id, &new.blocked_by_ticket_ids)
                .await?;
            ticket.blocked_by_ticket_ids = new.blocked_by_ticket_ids;
        }

        // Embedding is best-effort; creation never blocks on it.
        match self
            .embeddings
            .generate_ticket_embedding(&ticket.title, &ticket.description, &ticket.tags)
            .await
        {
            Ok(embedding) => ticket.embedding = Some(embedding),
            Err(e) => tracing::warn!(error = %e, "Ticket embedding failed; continuing without"),
        }

        self.ticket_repo.create(&ticket).await?;
        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket.id, &new.agent_id, "created")
                    .with_description(format!("Ticket created: {}", ticket.title)),
            )
            .await?;

        self.index_ticket(&ticket).await;

        tracing::info!(ticket_id = %ticket.id, title = %ticket.title, "Ticket created");
        Ok(ticket)
    }

    /// Replace a ticket's blocker list, refusing circular dependencies.
    pub async fn set_blockers(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        blocked_by: Vec<Uuid>,
    ) -> DomainResult<Ticket> {
        let mut ticket = self.require(ticket_id).await?;

        if !blocked_by.is_empty() {
            self.check_circular_blocking(ticket_id, &blocked_by).await?;
        }

        let old = serde_json::to_string(&ticket.blocked_by_ticket_ids)?;
        let change_type = if blocked_by.is_empty() { "unblocked" } else { "blocked" };
        ticket.blocked_by_ticket_ids = blocked_by;
        ticket.updated_at = Utc::now();
        self.ticket_repo.update(&ticket).await?;

        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket_id, agent_id, change_type)
                    .with_values(Some(old), Some(serde_json::to_string(&ticket.blocked_by_ticket_ids)?)),
            )
            .await?;
        Ok(ticket)
    }

    /// Move a ticket to another board column.
    ///
    /// Refused while the ticket has unresolved blockers; the error names
    /// them. Writes a status-change comment and a history row.
    pub async fn change_status(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        new_status: &str,
        comment: &str,
        commit_sha: Option<&str>,
    ) -> DomainResult<Ticket> {
        let mut ticket = self.require(ticket_id).await?;
        let board = self.require_board(ticket.workflow_id).await?;

        if !board.is_valid_status(new_status) {
            return Err(DomainError::InvalidArgument(format!(
                "Invalid status '{new_status}'. Valid statuses: {}",
                board.columns.join(", ")
            )));
        }

        if ticket.is_blocked() {
            let blockers = self
                .ticket_repo
                .get_many(&ticket.blocked_by_ticket_ids)
                .await?;
            let titles: Vec<String> = blockers
                .iter()
                .map(|t| format!("{}: {}", t.id, t.title))
                .collect();
            return Err(DomainError::TicketBlocked {
                ticket_id,
                blocker_count: ticket.blocked_by_ticket_ids.len(),
                blockers: titles.join(", "),
            });
        }

        let old_status = ticket.status.clone();
        ticket.status = new_status.to_string();
        ticket.updated_at = Utc::now();

        if new_status == board.initial_status {
            ticket.started_at = None;
            ticket.completed_at = None;
        } else if ticket.started_at.is_none() {
            ticket.started_at = Some(Utc::now());
        }
        if board.completion_status() == Some(new_status) {
            ticket.completed_at = Some(Utc::now());
        }

        self.ticket_repo.update(&ticket).await?;
        self.ticket_repo
            .add_comment(&TicketComment::new(
                ticket_id,
                agent_id,
                comment,
                CommentKind::StatusChange,
            ))
            .await?;
        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket_id, agent_id, "status_changed")
                    .with_values(Some(old_status.clone()), Some(new_status.to_string()))
                    .with_description(format!("Status changed from {old_status} to {new_status}")),
            )
            .await?;

        if let Some(sha) = commit_sha {
            self.link_commit(
                ticket_id,
                agent_id,
                sha,
                &format!("Status change: {old_status} -> {new_status}"),
                "status_change",
            )
            .await?;
        }

        tracing::info!(%ticket_id, from = %old_status, to = %new_status, "Ticket status changed");
        Ok(ticket)
    }

    pub async fn add_comment(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        text: &str,
        kind: CommentKind,
    ) -> DomainResult<TicketComment> {
        self.require(ticket_id).await?;
        let comment = TicketComment::new(ticket_id, agent_id, text, kind);
        self.ticket_repo.add_comment(&comment).await?;
        self.ticket_repo
            .add_history(&TicketHistoryEntry::new(ticket_id, agent_id, "commented"))
            .await?;
        Ok(comment)
    }

    pub async fn assign(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        assignee: &str,
    ) -> DomainResult<Ticket> {
        let mut ticket = self.require(ticket_id).await?;
        let old = ticket.assigned_agent_id.clone();
        ticket.assigned_agent_id = Some(assignee.to_string());
        ticket.updated_at = Utc::now();
        self.ticket_repo.update(&ticket).await?;
        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket_id, agent_id, "assigned")
                    .with_values(old, Some(assignee.to_string())),
            )
            .await?;
        Ok(ticket)
    }

    /// Link a git commit to a ticket, with best-effort diff stats.
    pub async fn link_commit(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        commit_sha: &str,
        commit_message: &str,
        link_method: &str,
    ) -> DomainResult<TicketCommitLink> {
        self.require(ticket_id).await?;

        let mut link = TicketCommitLink::new(
            ticket_id,
            agent_id,
            commit_sha,
            commit_message,
            link_method,
        );
        if let Some((files, insertions, deletions)) =
            commit_stats(Path::new(&self.main_repo_path), commit_sha).await
        {
            link.files_changed = Some(files);
            link.insertions = Some(insertions);
            link.deletions = Some(deletions);
        }

        self.ticket_repo.add_commit_link(&link).await?;
        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket_id, agent_id, "commit_linked")
                    .with_values(None, Some(commit_sha.to_string()))
                    .with_description(commit_message.to_string()),
            )
            .await?;
        Ok(link)
    }

    /// Resolve a ticket and cascade-unblock everything it was blocking.
    ///
    /// Dependent tickets lose this ticket from their blocker lists (with an
    /// "Unblocked" comment and history row each); tasks of dependents whose
    /// blocker list is now empty transition blocked → queued.
    pub async fn resolve(
        &self,
        ticket_id: Uuid,
        agent_id: &str,
        resolution_comment: &str,
        commit_sha: Option<&str>,
    ) -> DomainResult<ResolveOutcome> {
        let mut ticket = self.require(ticket_id).await?;

        ticket.is_resolved = true;
        ticket.resolved_at = Some(Utc::now());
        ticket.updated_at = Utc::now();
        self.ticket_repo.update(&ticket).await?;

        self.ticket_repo
            .add_comment(&TicketComment::new(
                ticket_id,
                agent_id,
                resolution_comment,
                CommentKind::Resolution,
            ))
            .await?;

        if let Some(sha) = commit_sha {
            self.link_commit(ticket_id, agent_id, sha, "Ticket resolution", "resolution")
                .await?;
        }

        let mut outcome = ResolveOutcome::default();

        // Remove this ticket from every dependent's blocker list.
        let dependents = self.ticket_repo.list_blocked_by(ticket_id).await?;
        for mut dependent in dependents {
            dependent.blocked_by_ticket_ids.retain(|id| *id != ticket_id);
            dependent.updated_at = Utc::now();
            self.ticket_repo.update(&dependent).await?;

            self.ticket_repo
                .add_comment(&TicketComment::new(
                    dependent.id,
                    agent_id,
                    format!("Unblocked - {ticket_id} was resolved"),
                    CommentKind::Blocker,
                ))
                .await?;
            self.ticket_repo
                .add_history(
                    &TicketHistoryEntry::new(dependent.id, agent_id, "unblocked")
                        .with_values(Some(ticket_id.to_string()), None)
                        .with_description(format!("Unblocked by resolution of {ticket_id}")),
                )
                .await?;

            outcome.unblocked_tickets.push(dependent.id);
        }

        self.ticket_repo
            .add_history(
                &TicketHistoryEntry::new(ticket_id, agent_id, "resolved")
                    .with_values(Some("false".to_string()), Some("true".to_string()))
                    .with_description(resolution_comment.to_string()),
            )
            .await?;

        // Unblock tasks only when ALL of their ticket's blockers are gone.
        for unblocked_ticket_id in &outcome.unblocked_tickets {
            let still_blocked = self
                .ticket_repo
                .get(*unblocked_ticket_id)
                .await?
                .is_some_and(|t| t.is_blocked());
            if still_blocked {
                tracing::info!(
                    ticket_id = %unblocked_ticket_id,
                    "Ticket still has other blockers; its tasks stay blocked"
                );
                continue;
            }

            let blocked_tasks = self
                .blocking
                .blocked_tasks_for_ticket(*unblocked_ticket_id)
                .await?;
            for task_id in blocked_tasks {
                match self.blocking.unblock(task_id).await {
                    Ok(true) => outcome.unblocked_tasks.push(task_id),
                    Ok(false) => {}
                    Err(e) => tracing::error!(%task_id, error = %e, "Failed to unblock task"),
                }
            }
        }

        tracing::info!(
            %ticket_id,
            unblocked_tickets = outcome.unblocked_tickets.len(),
            unblocked_tasks = outcome.unblocked_tasks.len(),
            "Ticket resolved"
        );
        Ok(outcome)
    }

    /// Semantic search over tickets, degrading to keyword search when the
    /// vector index is unavailable.
    pub async fn search(
        &self,
        workflow_id: Uuid,
        query: &str,
        limit: usize,
    ) -> DomainResult<Vec<TicketSearchHit>> {
        if let Some(index) = &self.vector_index {
            match self.semantic_search(index.as_ref(), workflow_id, query, limit).await {
                Ok(hits) => return Ok(hits),
                Err(e) => {
                    tracing::warn!(error = %e, "Vector search unavailable; degrading to keyword search");
                }
            }
        }
        self.ticket_repo.keyword_search(workflow_id, query, limit).await
    }

    async fn semantic_search(
        &self,
        index: &dyn VectorIndex,
        workflow_id: Uuid,
        query: &str,
        limit: usize,
    ) -> DomainResult<Vec<TicketSearchHit>> {
        let query_embedding = self.embeddings.generate(query).await?;
        let filter = json!({
            "must": [{"key": "workflow_id", "match": {"value": workflow_id.to_string()}}]
        });
        let points = index.search(&query_embedding, Some(filter), limit).await?;

        let ids: Vec<Uuid> = points
            .iter()
            .filter_map(|p| Uuid::parse_str(&p.id).ok())
            .collect();
        let tickets = self.ticket_repo.get_many(&ids).await?;

        let mut hits: Vec<TicketSearchHit> = points
            .into_iter()
            .filter_map(|point| {
                let id = Uuid::parse_str(&point.id).ok()?;
                let ticket = tickets.iter().find(|t| t.id == id)?.clone();
                Some(TicketSearchHit { ticket, rank: f64::from(point.score) })
            })
            .collect();
        hits.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits)
    }

    /// Refuse A→B blocking when B is already blocked by A.
    async fn check_circular_blocking(
        &self,
        ticket_id: Uuid,
        blocked_by: &[Uuid],
    ) -> DomainResult<()> {
        for blocker_id in blocked_by {
            if *blocker_id == ticket_id {
                return Err(DomainError::CircularBlocking {
                    ticket: ticket_id,
                    blocker: *blocker_id,
                });
            }
            if let Some(blocker) = self.ticket_repo.get(*blocker_id).await? {
                if blocker.blocked_by_ticket_ids.contains(&ticket_id) {
                    return Err(DomainError::CircularBlocking {
                        ticket: ticket_id,
                        blocker: *blocker_id,
                    });
                }
            }
        }
        Ok(())
    }

    async fn index_ticket(&self, ticket: &Ticket) {
        let (Some(index), Some(embedding)) = (&self.vector_index, &ticket.embedding) else {
            return;
        };
        let payload = json!({
            "kind": "ticket",
            "workflow_id": ticket.workflow_id.to_string(),
            "title": ticket.title,
        });
        if let Err(e) = index.upsert(&ticket.id.to_string(), embedding, payload).await {
            tracing::warn!(ticket_id = %ticket.id, error = %e, "Ticket vector upsert failed");
        }
    }

    pub async fn get(&self, ticket_id: Uuid) -> DomainResult<Option<Ticket>> {
        self.ticket_repo.get(ticket_id).await
    }

    pub async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        status: Option<&str>,
    ) -> DomainResult<Vec<Ticket>> {
        self.ticket_repo.list_by_workflow(workflow_id, status).await
    }

    async fn require(&self, ticket_id: Uuid) -> DomainResult<Ticket> {
        self.ticket_repo
            .get(ticket_id)
            .await?
            .ok_or(DomainError::TicketNotFound(ticket_id))
    }

    async fn require_board(&self, workflow_id: Uuid) -> DomainResult<BoardConfig> {
        self.ticket_repo
            .get_board_config(workflow_id)
            .await?
            .ok_or_else(|| {
                DomainError::InvalidArgument(format!(
                    "Board configuration not found for workflow: {workflow_id}"
                ))
            })
    }
}

/// Best-effort `git show --shortstat` parse for a commit.
async fn commit_stats(repo: &Path, sha: &str) -> Option<(i64, i64, i64)> {
    let output = tokio::process::Command::new("git")
        .args(["show", "--shortstat", "--format=", sha])
        .current_dir(repo)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().find(|l| l.contains("changed"))?;
    let mut files = 0;
    let mut insertions = 0;
    let mut deletions = 0;
    for part in line.split(',') {
        let number: i64 = part
            .trim()
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())?;
        if part.contains("file") {
            files = number;
        } else if part.contains("insertion") {
            insertions = number;
        } else if part.contains("deletion") {
            deletions = number;
        }
    }
    Some((files, insertions, deletions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::MockLlmClient;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteTaskRepository, SqliteTicketRepository,
        SqliteWorkflowRepository,
    };
    use crate::domain::models::{Task, TaskStatus, Workflow};
    use crate::domain::ports::TaskRepository;

    struct Fixture {
        service: TicketService,
        tickets: Arc<SqliteTicketRepository>,
        tasks: Arc<SqliteTaskRepository>,
        workflow_id: Uuid,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let tickets = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let workflows = Arc::new(SqliteWorkflowRepository::new(pool));

        let workflow = Workflow::new("wf", None);
        workflows.create_workflow(&workflow).await.unwrap();
        tickets
            .save_board_config(&BoardConfig::default_for_workflow(workflow.id, "board"))
            .await
            .unwrap();

        let blocking = Arc::new(TaskBlockingService::new(tasks.clone(), tickets.clone()));
        let embeddings = Arc::new(EmbeddingService::new(Arc::new(MockLlmClient::new())));

        let service = TicketService::new(
            tickets.clone(),
            workflows,
            blocking,
            embeddings,
            None,
            ".".to_string(),
        );
        Fixture { service, tickets, tasks, workflow_id: workflow.id }
    }

    fn new_ticket(fx: &Fixture, title: &str) -> NewTicket {
        NewTicket {
            workflow_id: fx.workflow_id,
            agent_id: "agent-1".to_string(),
            title: title.to_string(),
            description: "details".to_string(),
            ticket_type: "task".to_string(),
            priority: TicketPriority::Medium,
            initial_status: None,
            parent_ticket_id: None,
            blocked_by_ticket_ids: vec![],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_uses_board_initial_status() {
        let fx = setup().await;
        let ticket = fx.service.create(new_ticket(&fx, "first")).await.unwrap();
        assert_eq!(ticket.status, "backlog");
        assert!(ticket.embedding.is_some());

        let history = fx.tickets.list_history(ticket.id).await.unwrap();
        assert_eq!(history[0].change_type, "created");
    }

    #[tokio::test]
    async fn test_create_rejects_bad_type_and_status() {
        let fx = setup().await;
        let mut bad_type = new_ticket(&fx, "t");
        bad_type.ticket_type = "epic".to_string();
        assert!(fx.service.create(bad_type).await.is_err());

        let mut bad_status = new_ticket(&fx, "t");
        bad_status.initial_status = Some("launchpad".to_string());
        assert!(fx.service.create(bad_status).await.is_err());
    }

    #[tokio::test]
    async fn test_blocked_ticket_refuses_status_change() {
        let fx = setup().await;
        let blocker = fx.service.create(new_ticket(&fx, "schema work")).await.unwrap();
        let mut blocked = new_ticket(&fx, "endpoint work");
        blocked.blocked_by_ticket_ids = vec![blocker.id];
        let blocked = fx.service.create(blocked).await.unwrap();

        let err = fx
            .service
            .change_status(blocked.id, "a1", "in_progress", "starting", None)
            .await
            .unwrap_err();
        match err {
            DomainError::TicketBlocked { blocker_count, blockers, .. } => {
                assert_eq!(blocker_count, 1);
                assert!(blockers.contains("schema work"));
            }
            other => panic!("expected TicketBlocked, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_status_change_stamps_and_audits() {
        let fx = setup().await;
        let ticket = fx.service.create(new_ticket(&fx, "t")).await.unwrap();

        let updated = fx
            .service
            .change_status(ticket.id, "a1", "in_progress", "picking up", None)
            .await
            .unwrap();
        assert!(updated.started_at.is_some());
        assert!(updated.completed_at.is_none());

        let done = fx
            .service
            .change_status(ticket.id, "a1", "done", "finished", None)
            .await
            .unwrap();
        assert!(done.completed_at.is_some());

        let comments = fx.tickets.list_comments(ticket.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].comment_type, CommentKind::StatusChange);
    }

    #[tokio::test]
    async fn test_circular_blocking_refused() {
        let fx = setup().await;
        let a = fx.service.create(new_ticket(&fx, "a")).await.unwrap();
        let mut b_new = new_ticket(&fx, "b");
        b_new.blocked_by_ticket_ids = vec![a.id];
        let b = fx.service.create(b_new).await.unwrap();

        // a blocked by b while b is blocked by a → cycle.
        let err = fx
            .service
            .set_blockers(a.id, "a1", vec![b.id])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CircularBlocking { .. }));

        // Self-blocking is also a cycle.
        let err = fx.service.set_blockers(a.id, "a1", vec![a.id]).await.unwrap_err();
        assert!(matches!(err, DomainError::CircularBlocking { .. }));
    }

    #[tokio::test]
    async fn test_resolve_cascades_and_unblocks_tasks() {
        let fx = setup().await;
        let blocker = fx.service.create(new_ticket(&fx, "blocker")).await.unwrap();
        let mut dependent_new = new_ticket(&fx, "dependent");
        dependent_new.blocked_by_ticket_ids = vec![blocker.id];
        let dependent = fx.service.create(dependent_new).await.unwrap();

        let mut task = Task::new("task on dependent", "d").with_ticket(dependent.id);
        task.force_status(TaskStatus::Blocked, "test setup");
        fx.tasks.create(&task).await.unwrap();

        let outcome = fx
            .service
            .resolve(blocker.id, "a1", "done with the schema", None)
            .await
            .unwrap();

        assert_eq!(outcome.unblocked_tickets, vec![dependent.id]);
        assert_eq!(outcome.unblocked_tasks, vec![task.id]);

        let dependent_after = fx.tickets.get(dependent.id).await.unwrap().unwrap();
        assert!(dependent_after.blocked_by_ticket_ids.is_empty());

        let task_after = fx.tasks.get(task.id).await.unwrap().unwrap();
        assert_eq!(task_after.status, TaskStatus::Queued);
        assert!(task_after.queued_at.is_some());

        // The dependent got an unblocked history row.
        let history = fx.tickets.list_history(dependent.id).await.unwrap();
        assert!(history.iter().any(|h| h.change_type == "unblocked"));
    }

    #[tokio::test]
    async fn test_resolve_keeps_tasks_blocked_while_other_blockers_remain() {
        let fx = setup().await;
        let blocker1 = fx.service.create(new_ticket(&fx, "b1")).await.unwrap();
        let blocker2 = fx.service.create(new_ticket(&fx, "b2")).await.unwrap();
        let mut dependent_new = new_ticket(&fx, "dependent");
        dependent_new.blocked_by_ticket_ids = vec![blocker1.id, blocker2.id];
        let dependent = fx.service.create(dependent_new).await.unwrap();

        let mut task = Task::new("task", "d").with_ticket(dependent.id);
        task.force_status(TaskStatus::Blocked, "test setup");
        fx.tasks.create(&task).await.unwrap();

        let outcome = fx.service.resolve(blocker1.id, "a1", "first done", None).await.unwrap();
        assert_eq!(outcome.unblocked_tickets, vec![dependent.id]);
        assert!(outcome.unblocked_tasks.is_empty());
        assert_eq!(
            fx.tasks.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Blocked
        );

        // Resolving the second blocker finally frees the task.
        let outcome = fx.service.resolve(blocker2.id, "a1", "second done", None).await.unwrap();
        assert_eq!(outcome.unblocked_tasks, vec![task.id]);
        assert_eq!(
            fx.tasks.get(task.id).await.unwrap().unwrap().status,
            TaskStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_search_degrades_to_keyword() {
        let fx = setup().await;
        fx.service.create(new_ticket(&fx, "JWT refresh token")).await.unwrap();
        fx.service.create(new_ticket(&fx, "database migration")).await.unwrap();

        // No vector index configured → keyword path.
        let hits = fx.service.search(fx.workflow_id, "jwt", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].ticket.title.contains("JWT"));
    }
}
