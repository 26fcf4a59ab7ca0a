//! Domain errors for the Hephaestus orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur across the orchestrator core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("Ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("Worktree not found for agent: {0}")]
    WorktreeNotFound(Uuid),

    #[error("No active workflow")]
    NoActiveWorkflow,

    #[error("Multiple active workflows ({0}); select one explicitly")]
    MultipleActiveWorkflows(usize),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Ticket {ticket_id} is blocked by {blocker_count} ticket(s): {blockers}")]
    TicketBlocked {
        ticket_id: Uuid,
        blocker_count: usize,
        blockers: String,
    },

    #[error("Circular blocking detected: {blocker} is already blocked by {ticket}")]
    CircularBlocking { ticket: Uuid, blocker: Uuid },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Agent {agent_id} is not authorized for task {task_id}")]
    NotTaskOwner { agent_id: Uuid, task_id: Uuid },

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Worktree command failed: {0}")]
    WorktreeCommand(String),

    #[error("LLM call failed: {0}")]
    LlmError(String),

    #[error("Vector index unavailable: {0}")]
    VectorIndexUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl DomainError {
    /// Whether the error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::LlmError(_) | Self::VectorIndexUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_blocked_display() {
        let id = Uuid::new_v4();
        let err = DomainError::TicketBlocked {
            ticket_id: id,
            blocker_count: 2,
            blockers: "fix auth, add schema".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("blocked by 2 ticket(s)"));
        assert!(msg.contains("fix auth"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DomainError::LlmError("timeout".into()).is_transient());
        assert!(!DomainError::NoActiveWorkflow.is_transient());
    }
}
