//! Worktree domain model.
//!
//! Each agent owns exactly one git worktree on a private branch forked from a
//! parent commit. Merging or abandoning a worktree is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Merge status of a worktree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// In use by a live agent
    Active,
    /// Merged into the parent branch
    Merged,
    /// Work discarded
    Abandoned,
    /// On-disk tree and branch removed
    Cleaned,
}

impl Default for MergeStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
            Self::Cleaned => "cleaned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "merged" => Some(Self::Merged),
            "abandoned" => Some(Self::Abandoned),
            "cleaned" => Some(Self::Cleaned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// An isolated on-disk working tree owned by one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worktree {
    /// Owning agent
    pub agent_id: Uuid,
    /// Filesystem path of the working tree
    pub path: String,
    /// Private branch name (unique)
    pub branch: String,
    /// Agent whose branch this tree forked from (None for default branch)
    pub parent_agent_id: Option<Uuid>,
    /// Commit the branch was forked from
    pub parent_commit_sha: String,
    /// Base commit of the tree at creation
    pub base_commit_sha: String,
    /// Merge lifecycle state
    pub merge_status: MergeStatus,
    /// Resulting merge commit, when merged
    pub merge_commit_sha: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When merged
    pub merged_at: Option<DateTime<Utc>>,
}

impl Worktree {
    pub fn new(
        agent_id: Uuid,
        path: impl Into<String>,
        branch: impl Into<String>,
        parent_commit_sha: impl Into<String>,
    ) -> Self {
        let parent_sha = parent_commit_sha.into();
        Self {
            agent_id,
            path: path.into(),
            branch: branch.into(),
            parent_agent_id: None,
            parent_commit_sha: parent_sha.clone(),
            base_commit_sha: parent_sha,
            merge_status: MergeStatus::Active,
            merge_commit_sha: None,
            created_at: Utc::now(),
            merged_at: None,
        }
    }

    /// Branch name for an agent's private worktree.
    pub fn branch_name_for_agent(agent_id: Uuid) -> String {
        format!("hephaestus/agent-{}", &agent_id.to_string()[..8])
    }

    /// On-disk path for an agent's worktree under the configured root.
    pub fn path_for_agent(root: &str, agent_id: Uuid) -> String {
        format!("{}/agent-{}", root, &agent_id.to_string()[..8])
    }

    /// Mark as merged.
    pub fn merged(&mut self, commit_sha: impl Into<String>) {
        self.merge_status = MergeStatus::Merged;
        self.merge_commit_sha = Some(commit_sha.into());
        self.merged_at = Some(Utc::now());
    }

    /// Mark as abandoned.
    pub fn abandon(&mut self) {
        self.merge_status = MergeStatus::Abandoned;
    }

    /// Mark as cleaned from disk.
    pub fn cleaned(&mut self) {
        self.merge_status = MergeStatus::Cleaned;
    }
}

/// Kind of a recorded worktree commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeCommitKind {
    ParentCheckpoint,
    ValidationReady,
    Final,
    AutoSave,
    ConflictResolution,
    Merge,
}

impl WorktreeCommitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParentCheckpoint => "parent_checkpoint",
            Self::ValidationReady => "validation_ready",
            Self::Final => "final",
            Self::AutoSave => "auto_save",
            Self::ConflictResolution => "conflict_resolution",
            Self::Merge => "merge",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "parent_checkpoint" => Some(Self::ParentCheckpoint),
            "validation_ready" => Some(Self::ValidationReady),
            "final" => Some(Self::Final),
            "auto_save" => Some(Self::AutoSave),
            "conflict_resolution" => Some(Self::ConflictResolution),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// A commit recorded inside an agent worktree, for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorktreeCommit {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub commit_sha: String,
    pub commit_type: WorktreeCommitKind,
    pub commit_message: String,
    pub created_at: DateTime<Utc>,
}

impl WorktreeCommit {
    pub fn new(
        agent_id: Uuid,
        commit_sha: impl Into<String>,
        commit_type: WorktreeCommitKind,
        commit_message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            commit_sha: commit_sha.into(),
            commit_type,
            commit_message: commit_message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Which side won a file-level merge conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    Parent,
    Child,
    TieChild,
}

impl ResolutionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
            Self::TieChild => "tie_child",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            "tie_child" => Some(Self::TieChild),
            _ => None,
        }
    }
}

/// Audit record for an automatically resolved merge conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub agent_id: Uuid,
    pub file_path: String,
    pub parent_modified_at: Option<DateTime<Utc>>,
    pub child_modified_at: Option<DateTime<Utc>>,
    pub resolution_choice: ResolutionChoice,
    pub resolved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worktree_lifecycle() {
        let agent_id = Uuid::new_v4();
        let mut wt = Worktree::new(agent_id, "/tmp/wt", "hephaestus/agent-1", "abc123");
        assert_eq!(wt.merge_status, MergeStatus::Active);
        assert_eq!(wt.base_commit_sha, "abc123");

        wt.merged("def456");
        assert_eq!(wt.merge_status, MergeStatus::Merged);
        assert_eq!(wt.merge_commit_sha.as_deref(), Some("def456"));
        assert!(wt.merged_at.is_some());
        assert!(wt.merge_status.is_terminal());
    }

    #[test]
    fn test_branch_and_path_naming() {
        let id = Uuid::parse_str("12345678-1234-1234-1234-123456789abc").unwrap();
        assert_eq!(Worktree::branch_name_for_agent(id), "hephaestus/agent-12345678");
        assert_eq!(
            Worktree::path_for_agent("/var/worktrees", id),
            "/var/worktrees/agent-12345678"
        );
    }

    #[test]
    fn test_resolution_choice_round_trip() {
        for c in [ResolutionChoice::Parent, ResolutionChoice::Child, ResolutionChoice::TieChild] {
            assert_eq!(ResolutionChoice::from_str(c.as_str()), Some(c));
        }
    }
}
