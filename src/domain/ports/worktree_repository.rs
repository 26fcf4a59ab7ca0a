//! Worktree repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ConflictResolution, MergeStatus, Worktree, WorktreeCommit};

/// Repository interface for worktree state and merge audit.
#[async_trait]
pub trait WorktreeRepository: Send + Sync {
    async fn create(&self, worktree: &Worktree) -> DomainResult<()>;

    /// The worktree owned by an agent.
    async fn get_by_agent(&self, agent_id: Uuid) -> DomainResult<Option<Worktree>>;

    async fn update(&self, worktree: &Worktree) -> DomainResult<()>;

    async fn list_by_status(&self, status: MergeStatus) -> DomainResult<Vec<Worktree>>;

    /// Record a commit made inside an agent worktree.
    async fn record_commit(&self, commit: &WorktreeCommit) -> DomainResult<()>;

    async fn list_commits(&self, agent_id: Uuid) -> DomainResult<Vec<WorktreeCommit>>;

    /// Record an automatic merge-conflict resolution.
    async fn record_conflict_resolution(&self, resolution: &ConflictResolution) -> DomainResult<()>;

    async fn list_conflict_resolutions(&self, agent_id: Uuid)
        -> DomainResult<Vec<ConflictResolution>>;
}
