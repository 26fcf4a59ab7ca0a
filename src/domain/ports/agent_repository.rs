//! Agent repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, AgentLog, AgentStatus, LogKind};

/// Repository interface for Agent and AgentLog persistence.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Create a new agent.
    async fn create(&self, agent: &Agent) -> DomainResult<()>;

    /// Get an agent by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>>;

    /// Update an existing agent.
    async fn update(&self, agent: &Agent) -> DomainResult<()>;

    /// Agents with status != terminated.
    async fn list_active(&self) -> DomainResult<Vec<Agent>>;

    /// Count of agents with status != terminated (admission control).
    async fn count_active(&self) -> DomainResult<i64>;

    /// Agents by status.
    async fn list_by_status(&self, status: AgentStatus) -> DomainResult<Vec<Agent>>;

    /// Recently terminated agents bound to any of the given tasks.
    async fn list_terminated_for_tasks(
        &self,
        task_ids: &[Uuid],
        limit: usize,
    ) -> DomainResult<Vec<Agent>>;

    /// Append an agent log entry, returning its row id.
    async fn append_log(&self, log: &AgentLog) -> DomainResult<i64>;

    /// All logs for an agent of the given kinds, oldest first. Empty kinds
    /// matches everything.
    async fn logs_for_agent(&self, agent_id: Uuid, kinds: &[LogKind]) -> DomainResult<Vec<AgentLog>>;

    /// Most recent log entry of a kind for an agent.
    async fn latest_log_of_kind(
        &self,
        agent_id: Uuid,
        kind: LogKind,
    ) -> DomainResult<Option<AgentLog>>;
}
