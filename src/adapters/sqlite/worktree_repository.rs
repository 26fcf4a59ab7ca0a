//! SQLite implementation of the WorktreeRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConflictResolution, MergeStatus, ResolutionChoice, Worktree, WorktreeCommit,
    WorktreeCommitKind,
};
use crate::domain::ports::WorktreeRepository;

#[derive(Clone)]
pub struct SqliteWorktreeRepository {
    pool: SqlitePool,
}

impl SqliteWorktreeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorktreeRepository for SqliteWorktreeRepository {
    async fn create(&self, worktree: &Worktree) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO worktrees (agent_id, path, branch, parent_agent_id, parent_commit_sha,
               base_commit_sha, merge_status, merge_commit_sha, created_at, merged_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(worktree.agent_id.to_string())
        .bind(&worktree.path)
        .bind(&worktree.branch)
        .bind(worktree.parent_agent_id.map(|id| id.to_string()))
        .bind(&worktree.parent_commit_sha)
        .bind(&worktree.base_commit_sha)
        .bind(worktree.merge_status.as_str())
        .bind(&worktree.merge_commit_sha)
        .bind(worktree.created_at.to_rfc3339())
        .bind(worktree.merged_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_agent(&self, agent_id: Uuid) -> DomainResult<Option<Worktree>> {
        let row: Option<WorktreeRow> = sqlx::query_as("SELECT * FROM worktrees WHERE agent_id = ?")
            .bind(agent_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, worktree: &Worktree) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE worktrees SET merge_status = ?, merge_commit_sha = ?, merged_at = ?
               WHERE agent_id = ?"#,
        )
        .bind(worktree.merge_status.as_str())
        .bind(&worktree.merge_commit_sha)
        .bind(worktree.merged_at.map(|t| t.to_rfc3339()))
        .bind(worktree.agent_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::WorktreeNotFound(worktree.agent_id));
        }
        Ok(())
    }

    async fn list_by_status(&self, status: MergeStatus) -> DomainResult<Vec<Worktree>> {
        let rows: Vec<WorktreeRow> =
            sqlx::query_as("SELECT * FROM worktrees WHERE merge_status = ? ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_commit(&self, commit: &WorktreeCommit) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO worktree_commits (id, agent_id, commit_sha, commit_type,
               commit_message, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(commit.id.to_string())
        .bind(commit.agent_id.to_string())
        .bind(&commit.commit_sha)
        .bind(commit.commit_type.as_str())
        .bind(&commit.commit_message)
        .bind(commit.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_commits(&self, agent_id: Uuid) -> DomainResult<Vec<WorktreeCommit>> {
        let rows: Vec<CommitRow> =
            sqlx::query_as("SELECT * FROM worktree_commits WHERE agent_id = ? ORDER BY created_at")
                .bind(agent_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_conflict_resolution(
        &self,
        resolution: &ConflictResolution,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO merge_conflict_resolutions (agent_id, file_path, parent_modified_at,
               child_modified_at, resolution_choice, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(resolution.agent_id.to_string())
        .bind(&resolution.file_path)
        .bind(resolution.parent_modified_at.map(|t| t.to_rfc3339()))
        .bind(resolution.child_modified_at.map(|t| t.to_rfc3339()))
        .bind(resolution.resolution_choice.as_str())
        .bind(resolution.resolved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_conflict_resolutions(
        &self,
        agent_id: Uuid,
    ) -> DomainResult<Vec<ConflictResolution>> {
        let rows: Vec<ResolutionRow> = sqlx::query_as(
            "SELECT * FROM merge_conflict_resolutions WHERE agent_id = ? ORDER BY resolved_at",
        )
        .bind(agent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct WorktreeRow {
    agent_id: String,
    path: String,
    branch: String,
    parent_agent_id: Option<String>,
    parent_commit_sha: String,
    base_commit_sha: String,
    merge_status: String,
    merge_commit_sha: Option<String>,
    created_at: String,
    merged_at: Option<String>,
}

impl TryFrom<WorktreeRow> for Worktree {
    type Error = DomainError;

    fn try_from(row: WorktreeRow) -> Result<Self, Self::Error> {
        let merge_status = MergeStatus::from_str(&row.merge_status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid merge_status: {}", row.merge_status))
        })?;
        Ok(Worktree {
            agent_id: super::parse_uuid(&row.agent_id)?,
            path: row.path,
            branch: row.branch,
            parent_agent_id: super::parse_optional_uuid(row.parent_agent_id)?,
            parent_commit_sha: row.parent_commit_sha,
            base_commit_sha: row.base_commit_sha,
            merge_status,
            merge_commit_sha: row.merge_commit_sha,
            created_at: super::parse_datetime(&row.created_at)?,
            merged_at: super::parse_optional_datetime(row.merged_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommitRow {
    id: String,
    agent_id: String,
    commit_sha: String,
    commit_type: String,
    commit_message: String,
    created_at: String,
}

impl TryFrom<CommitRow> for WorktreeCommit {
    type Error = DomainError;

    fn try_from(row: CommitRow) -> Result<Self, Self::Error> {
        let commit_type = WorktreeCommitKind::from_str(&row.commit_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid commit_type: {}", row.commit_type))
        })?;
        Ok(WorktreeCommit {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            commit_sha: row.commit_sha,
            commit_type,
            commit_message: row.commit_message,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResolutionRow {
    agent_id: String,
    file_path: String,
    parent_modified_at: Option<String>,
    child_modified_at: Option<String>,
    resolution_choice: String,
    resolved_at: String,
}

impl TryFrom<ResolutionRow> for ConflictResolution {
    type Error = DomainError;

    fn try_from(row: ResolutionRow) -> Result<Self, Self::Error> {
        let resolution_choice = ResolutionChoice::from_str(&row.resolution_choice).ok_or_else(|| {
            DomainError::SerializationError(format!(
                "Invalid resolution_choice: {}",
                row.resolution_choice
            ))
        })?;
        Ok(ConflictResolution {
            agent_id: super::parse_uuid(&row.agent_id)?,
            file_path: row.file_path,
            parent_modified_at: super::parse_optional_datetime(row.parent_modified_at)?,
            child_modified_at: super::parse_optional_datetime(row.child_modified_at)?,
            resolution_choice,
            resolved_at: super::parse_datetime(&row.resolved_at)?,
        })
    }
}
