//! SQLite implementation of the TicketRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    BoardConfig, CommentKind, Ticket, TicketCommitLink, TicketComment, TicketHistoryEntry,
    TicketPriority,
};
use crate::domain::ports::{TicketRepository, TicketSearchHit};

#[derive(Clone)]
pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn create(&self, ticket: &Ticket) -> DomainResult<()> {
        let embedding_json = super::to_json_opt(&ticket.embedding)?;
        sqlx::query(
            r#"INSERT INTO tickets (id, workflow_id, created_by_agent_id, assigned_agent_id,
               title, description, ticket_type, priority, status, created_at, updated_at,
               started_at, completed_at, parent_ticket_id, related_task_ids, tags, embedding,
               blocked_by_ticket_ids, is_resolved, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(ticket.id.to_string())
        .bind(ticket.workflow_id.to_string())
        .bind(&ticket.created_by_agent_id)
        .bind(&ticket.assigned_agent_id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.ticket_type)
        .bind(ticket.priority.as_str())
        .bind(&ticket.status)
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .bind(ticket.started_at.map(|t| t.to_rfc3339()))
        .bind(ticket.completed_at.map(|t| t.to_rfc3339()))
        .bind(ticket.parent_ticket_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&ticket.related_task_ids)?)
        .bind(serde_json::to_string(&ticket.tags)?)
        .bind(embedding_json)
        .bind(serde_json::to_string(&ticket.blocked_by_ticket_ids)?)
        .bind(ticket.is_resolved)
        .bind(ticket.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, ticket: &Ticket) -> DomainResult<()> {
        let embedding_json = super::to_json_opt(&ticket.embedding)?;
        let result = sqlx::query(
            r#"UPDATE tickets SET assigned_agent_id = ?, title = ?, description = ?,
               ticket_type = ?, priority = ?, status = ?, updated_at = ?, started_at = ?,
               completed_at = ?, parent_ticket_id = ?, related_task_ids = ?, tags = ?,
               embedding = ?, blocked_by_ticket_ids = ?, is_resolved = ?, resolved_at = ?
               WHERE id = ?"#,
        )
        .bind(&ticket.assigned_agent_id)
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(&ticket.ticket_type)
        .bind(ticket.priority.as_str())
        .bind(&ticket.status)
        .bind(ticket.updated_at.to_rfc3339())
        .bind(ticket.started_at.map(|t| t.to_rfc3339()))
        .bind(ticket.completed_at.map(|t| t.to_rfc3339()))
        .bind(ticket.parent_ticket_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&ticket.related_task_ids)?)
        .bind(serde_json::to_string(&ticket.tags)?)
        .bind(embedding_json)
        .bind(serde_json::to_string(&ticket.blocked_by_ticket_ids)?)
        .bind(ticket.is_resolved)
        .bind(ticket.resolved_at.map(|t| t.to_rfc3339()))
        .bind(ticket.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TicketNotFound(ticket.id));
        }
        Ok(())
    }

    async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        status: Option<&str>,
    ) -> DomainResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = match status {
            Some(s) => {
                sqlx::query_as(
                    "SELECT * FROM tickets WHERE workflow_id = ? AND status = ? ORDER BY created_at",
                )
                .bind(workflow_id.to_string())
                .bind(s)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM tickets WHERE workflow_id = ? ORDER BY created_at")
                    .bind(workflow_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_blocked_by(&self, ticket_id: Uuid) -> DomainResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            r#"SELECT t.* FROM tickets t
               WHERE EXISTS (
                   SELECT 1 FROM json_each(coalesce(t.blocked_by_ticket_ids, '[]'))
                   WHERE json_each.value = ?
               )"#,
        )
        .bind(ticket_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Ticket>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM tickets WHERE id IN ({placeholders})");
        let mut q = sqlx::query_as::<_, TicketRow>(&sql);
        for id in ids {
            q = q.bind(id.to_string());
        }
        let rows: Vec<TicketRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn keyword_search(
        &self,
        workflow_id: Uuid,
        query: &str,
        limit: usize,
    ) -> DomainResult<Vec<TicketSearchHit>> {
        // Quote each term so FTS syntax characters in user input stay literal.
        let fts_query = query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" ");
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<SearchRow> = sqlx::query_as(
            r#"SELECT t.*, tickets_fts.rank AS search_rank FROM tickets_fts
               JOIN tickets t ON t.rowid = tickets_fts.rowid
               WHERE tickets_fts MATCH ? AND t.workflow_id = ?
               ORDER BY tickets_fts.rank LIMIT ?"#,
        )
        .bind(&fts_query)
        .bind(workflow_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let rank = row.search_rank;
                row.ticket.try_into().map(|ticket| TicketSearchHit { ticket, rank })
            })
            .collect()
    }

    async fn add_comment(&self, comment: &TicketComment) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO ticket_comments (id, ticket_id, agent_id, comment_text, comment_type, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(comment.id.to_string())
        .bind(comment.ticket_id.to_string())
        .bind(&comment.agent_id)
        .bind(&comment.comment_text)
        .bind(comment.comment_type.as_str())
        .bind(comment.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_comments(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketComment>> {
        let rows: Vec<CommentRow> =
            sqlx::query_as("SELECT * FROM ticket_comments WHERE ticket_id = ? ORDER BY created_at")
                .bind(ticket_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn add_history(&self, entry: &TicketHistoryEntry) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO ticket_history (ticket_id, agent_id, change_type, field_name,
               old_value, new_value, change_description, changed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.ticket_id.to_string())
        .bind(&entry.agent_id)
        .bind(&entry.change_type)
        .bind(&entry.field_name)
        .bind(&entry.old_value)
        .bind(&entry.new_value)
        .bind(&entry.change_description)
        .bind(entry.changed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_history(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketHistoryEntry>> {
        let rows: Vec<HistoryRow> =
            sqlx::query_as("SELECT * FROM ticket_history WHERE ticket_id = ? ORDER BY changed_at, id")
                .bind(ticket_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn add_commit_link(&self, link: &TicketCommitLink) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO ticket_commits (id, ticket_id, agent_id, commit_sha, commit_message,
               files_changed, insertions, deletions, linked_at, link_method)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(link.id.to_string())
        .bind(link.ticket_id.to_string())
        .bind(&link.agent_id)
        .bind(&link.commit_sha)
        .bind(&link.commit_message)
        .bind(link.files_changed)
        .bind(link.insertions)
        .bind(link.deletions)
        .bind(link.linked_at.to_rfc3339())
        .bind(&link.link_method)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_commit_links(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketCommitLink>> {
        let rows: Vec<CommitLinkRow> =
            sqlx::query_as("SELECT * FROM ticket_commits WHERE ticket_id = ? ORDER BY linked_at")
                .bind(ticket_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_board_config(&self, board: &BoardConfig) -> DomainResult<()> {
        board.validate().map_err(DomainError::InvalidArgument)?;
        sqlx::query(
            r#"INSERT INTO board_configs (id, workflow_id, name, columns, ticket_types,
               default_ticket_type, initial_status, allow_reopen,
               require_comments_on_status_change, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id) DO UPDATE SET
                   name = excluded.name,
                   columns = excluded.columns,
                   ticket_types = excluded.ticket_types,
                   default_ticket_type = excluded.default_ticket_type,
                   initial_status = excluded.initial_status,
                   allow_reopen = excluded.allow_reopen,
                   require_comments_on_status_change = excluded.require_comments_on_status_change,
                   updated_at = excluded.updated_at"#,
        )
        .bind(board.id.to_string())
        .bind(board.workflow_id.to_string())
        .bind(&board.name)
        .bind(serde_json::to_string(&board.columns)?)
        .bind(serde_json::to_string(&board.ticket_types)?)
        .bind(&board.default_ticket_type)
        .bind(&board.initial_status)
        .bind(board.allow_reopen)
        .bind(board.require_comments_on_status_change)
        .bind(board.created_at.to_rfc3339())
        .bind(board.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_board_config(&self, workflow_id: Uuid) -> DomainResult<Option<BoardConfig>> {
        let row: Option<BoardRow> =
            sqlx::query_as("SELECT * FROM board_configs WHERE workflow_id = ?")
                .bind(workflow_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn any_board_config(&self) -> DomainResult<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM board_configs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    workflow_id: String,
    created_by_agent_id: String,
    assigned_agent_id: Option<String>,
    title: String,
    description: String,
    ticket_type: String,
    priority: String,
    status: String,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    parent_ticket_id: Option<String>,
    related_task_ids: Option<String>,
    tags: Option<String>,
    embedding: Option<String>,
    blocked_by_ticket_ids: Option<String>,
    is_resolved: bool,
    resolved_at: Option<String>,
}

#[derive(sqlx::FromRow)]
struct SearchRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    search_rank: f64,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = DomainError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let priority = TicketPriority::from_str(&row.priority).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid priority: {}", row.priority))
        })?;
        let embedding: Option<Vec<f32>> = row
            .embedding
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        let related_ids: Vec<String> = super::parse_json_or_default(row.related_task_ids)?;
        let blocked_ids: Vec<String> = super::parse_json_or_default(row.blocked_by_ticket_ids)?;

        Ok(Ticket {
            id: super::parse_uuid(&row.id)?,
            workflow_id: super::parse_uuid(&row.workflow_id)?,
            created_by_agent_id: row.created_by_agent_id,
            assigned_agent_id: row.assigned_agent_id,
            title: row.title,
            description: row.description,
            ticket_type: row.ticket_type,
            priority,
            status: row.status,
            parent_ticket_id: super::parse_optional_uuid(row.parent_ticket_id)?,
            related_task_ids: related_ids
                .iter()
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect(),
            tags: super::parse_json_or_default(row.tags)?,
            embedding,
            blocked_by_ticket_ids: blocked_ids
                .iter()
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect(),
            is_resolved: row.is_resolved,
            resolved_at: super::parse_optional_datetime(row.resolved_at)?,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
            started_at: super::parse_optional_datetime(row.started_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: String,
    ticket_id: String,
    agent_id: String,
    comment_text: String,
    comment_type: String,
    created_at: String,
}

impl TryFrom<CommentRow> for TicketComment {
    type Error = DomainError;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        let comment_type = CommentKind::from_str(&row.comment_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid comment_type: {}", row.comment_type))
        })?;
        Ok(TicketComment {
            id: super::parse_uuid(&row.id)?,
            ticket_id: super::parse_uuid(&row.ticket_id)?,
            agent_id: row.agent_id,
            comment_text: row.comment_text,
            comment_type,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    ticket_id: String,
    agent_id: String,
    change_type: String,
    field_name: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    change_description: Option<String>,
    changed_at: String,
}

impl TryFrom<HistoryRow> for TicketHistoryEntry {
    type Error = DomainError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(TicketHistoryEntry {
            id: Some(row.id),
            ticket_id: super::parse_uuid(&row.ticket_id)?,
            agent_id: row.agent_id,
            change_type: row.change_type,
            field_name: row.field_name,
            old_value: row.old_value,
            new_value: row.new_value,
            change_description: row.change_description,
            changed_at: super::parse_datetime(&row.changed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommitLinkRow {
    id: String,
    ticket_id: String,
    agent_id: String,
    commit_sha: String,
    commit_message: String,
    files_changed: Option<i64>,
    insertions: Option<i64>,
    deletions: Option<i64>,
    linked_at: String,
    link_method: String,
}

impl TryFrom<CommitLinkRow> for TicketCommitLink {
    type Error = DomainError;

    fn try_from(row: CommitLinkRow) -> Result<Self, Self::Error> {
        Ok(TicketCommitLink {
            id: super::parse_uuid(&row.id)?,
            ticket_id: super::parse_uuid(&row.ticket_id)?,
            agent_id: row.agent_id,
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            files_changed: row.files_changed,
            insertions: row.insertions,
            deletions: row.deletions,
            linked_at: super::parse_datetime(&row.linked_at)?,
            link_method: row.link_method,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BoardRow {
    id: String,
    workflow_id: String,
    name: String,
    columns: String,
    ticket_types: String,
    default_ticket_type: Option<String>,
    initial_status: String,
    allow_reopen: bool,
    require_comments_on_status_change: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<BoardRow> for BoardConfig {
    type Error = DomainError;

    fn try_from(row: BoardRow) -> Result<Self, Self::Error> {
        Ok(BoardConfig {
            id: super::parse_uuid(&row.id)?,
            workflow_id: super::parse_uuid(&row.workflow_id)?,
            name: row.name,
            columns: serde_json::from_str(&row.columns)?,
            ticket_types: serde_json::from_str(&row.ticket_types)?,
            default_ticket_type: row.default_ticket_type,
            initial_status: row.initial_status,
            allow_reopen: row.allow_reopen,
            require_comments_on_status_change: row.require_comments_on_status_change,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::Workflow;
    use crate::domain::ports::WorkflowRepository;

    async fn setup() -> (SqliteTicketRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let workflow = Workflow::new("wf", None);
        crate::adapters::sqlite::SqliteWorkflowRepository::new(pool.clone())
            .create_workflow(&workflow)
            .await
            .unwrap();
        (SqliteTicketRepository::new(pool), workflow.id)
    }

    fn ticket(workflow_id: Uuid, title: &str) -> Ticket {
        Ticket::new(
            workflow_id,
            "agent-1",
            title,
            "description text",
            "task",
            TicketPriority::Medium,
            "backlog",
        )
    }

    #[tokio::test]
    async fn test_create_get_update() {
        let (repo, wf) = setup().await;
        let mut t = ticket(wf, "Fix login");
        repo.create(&t).await.unwrap();

        t.status = "in_progress".to_string();
        repo.update(&t).await.unwrap();

        let got = repo.get(t.id).await.unwrap().unwrap();
        assert_eq!(got.status, "in_progress");
    }

    #[tokio::test]
    async fn test_list_blocked_by_scans_json() {
        let (repo, wf) = setup().await;
        let blocker = ticket(wf, "schema first");
        repo.create(&blocker).await.unwrap();

        let mut blocked = ticket(wf, "endpoint later");
        blocked.blocked_by_ticket_ids = vec![blocker.id];
        repo.create(&blocked).await.unwrap();

        let dependents = repo.list_blocked_by(blocker.id).await.unwrap();
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].id, blocked.id);
    }

    #[tokio::test]
    async fn test_keyword_search() {
        let (repo, wf) = setup().await;
        let mut t = ticket(wf, "JWT token refresh");
        t.tags = vec!["auth".to_string()];
        repo.create(&t).await.unwrap();
        repo.create(&ticket(wf, "Database migration")).await.unwrap();

        let hits = repo.keyword_search(wf, "jwt", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ticket.id, t.id);

        // Tag text is searchable too.
        let hits = repo.keyword_search(wf, "auth", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_keyword_search_sees_updates() {
        let (repo, wf) = setup().await;
        let mut t = ticket(wf, "Initial title");
        repo.create(&t).await.unwrap();

        t.title = "Renamed websocket work".to_string();
        repo.update(&t).await.unwrap();

        assert!(repo.keyword_search(wf, "initial", 10).await.unwrap().is_empty());
        assert_eq!(repo.keyword_search(wf, "websocket", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_board_config_upsert() {
        let (repo, wf) = setup().await;
        assert!(!repo.any_board_config().await.unwrap());

        let board = BoardConfig::default_for_workflow(wf, "board");
        repo.save_board_config(&board).await.unwrap();
        assert!(repo.any_board_config().await.unwrap());

        let mut updated = board.clone();
        updated.columns.push("archived".to_string());
        repo.save_board_config(&updated).await.unwrap();

        let got = repo.get_board_config(wf).await.unwrap().unwrap();
        assert!(got.columns.contains(&"archived".to_string()));
    }

    #[tokio::test]
    async fn test_comments_and_history() {
        let (repo, wf) = setup().await;
        let t = ticket(wf, "with audit");
        repo.create(&t).await.unwrap();

        repo.add_comment(&TicketComment::new(t.id, "a1", "looks blocked", CommentKind::Blocker))
            .await
            .unwrap();
        repo.add_history(
            &TicketHistoryEntry::new(t.id, "a1", "created").with_description("ticket created"),
        )
        .await
        .unwrap();

        assert_eq!(repo.list_comments(t.id).await.unwrap().len(), 1);
        assert_eq!(repo.list_history(t.id).await.unwrap().len(), 1);
    }
}
