//! Ticket repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    BoardConfig, Ticket, TicketCommitLink, TicketComment, TicketHistoryEntry,
};

/// A keyword-search hit with its relevance rank.
#[derive(Debug, Clone)]
pub struct TicketSearchHit {
    pub ticket: Ticket,
    pub rank: f64,
}

/// Repository interface for tickets, comments, history, commit links, and
/// board configurations.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create(&self, ticket: &Ticket) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>>;

    async fn update(&self, ticket: &Ticket) -> DomainResult<()>;

    /// Tickets in a workflow, optionally filtered by status.
    async fn list_by_workflow(
        &self,
        workflow_id: Uuid,
        status: Option<&str>,
    ) -> DomainResult<Vec<Ticket>>;

    /// Tickets whose blocked_by list contains the given ticket.
    async fn list_blocked_by(&self, ticket_id: Uuid) -> DomainResult<Vec<Ticket>>;

    /// Fetch a batch of tickets by id.
    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Ticket>>;

    /// Full-text keyword search over title/description/tags.
    async fn keyword_search(
        &self,
        workflow_id: Uuid,
        query: &str,
        limit: usize,
    ) -> DomainResult<Vec<TicketSearchHit>>;

    async fn add_comment(&self, comment: &TicketComment) -> DomainResult<()>;

    async fn list_comments(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketComment>>;

    async fn add_history(&self, entry: &TicketHistoryEntry) -> DomainResult<()>;

    async fn list_history(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketHistoryEntry>>;

    async fn add_commit_link(&self, link: &TicketCommitLink) -> DomainResult<()>;

    async fn list_commit_links(&self, ticket_id: Uuid) -> DomainResult<Vec<TicketCommitLink>>;

    async fn save_board_config(&self, board: &BoardConfig) -> DomainResult<()>;

    async fn get_board_config(&self, workflow_id: Uuid) -> DomainResult<Option<BoardConfig>>;

    /// Whether any board config exists (ticket tracking active).
    async fn any_board_config(&self) -> DomainResult<bool>;
}
