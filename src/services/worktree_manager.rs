//! Per-agent git worktree isolation.
//!
//! Every agent works on a private branch in its own worktree, forked from the
//! parent agent's branch head (or the repository's default branch). Merging
//! back resolves file-level conflicts by last-modified timestamp, newer side
//! wins, ties go to the child; every resolution is recorded.

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConflictResolution, MergeStatus, ResolutionChoice, Worktree, WorktreeCommit,
    WorktreeCommitKind,
};
use crate::domain::ports::WorktreeRepository;

/// Run a git command in `dir`, returning trimmed stdout.
async fn git(dir: &Path, args: &[&str]) -> DomainResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| DomainError::WorktreeCommand(format!("git spawn failed: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DomainError::WorktreeCommand(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`git`] but only reports success.
async fn git_ok(dir: &Path, args: &[&str]) -> DomainResult<bool> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| DomainError::WorktreeCommand(format!("git spawn failed: {e}")))?;
    Ok(output.status.success())
}

/// Manages per-agent worktrees of the main repository.
pub struct WorktreeManager {
    repo: Arc<dyn WorktreeRepository>,
    main_repo_path: PathBuf,
    worktrees_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(
        repo: Arc<dyn WorktreeRepository>,
        main_repo_path: PathBuf,
        worktrees_root: PathBuf,
    ) -> Self {
        Self { repo, main_repo_path, worktrees_root }
    }

    /// Fork a fresh worktree for an agent.
    ///
    /// The new branch starts at the parent agent's branch head, or at the
    /// default branch head when no parent is given.
    pub async fn create(
        &self,
        agent_id: Uuid,
        parent_agent_id: Option<Uuid>,
    ) -> DomainResult<Worktree> {
        let (parent_ref, parent_sha) = self.resolve_parent(parent_agent_id).await?;

        let branch = Worktree::branch_name_for_agent(agent_id);
        let root = self.worktrees_root.to_string_lossy();
        let path = Worktree::path_for_agent(&root, agent_id);

        tokio::fs::create_dir_all(&self.worktrees_root)
            .await
            .map_err(|e| DomainError::WorktreeCommand(format!("mkdir failed: {e}")))?;

        git(
            &self.main_repo_path,
            &["worktree", "add", "-b", &branch, &path, &parent_sha],
        )
        .await?;

        let mut worktree = Worktree::new(agent_id, path, branch, parent_sha);
        worktree.parent_agent_id = parent_agent_id;
        self.repo.create(&worktree).await?;

        tracing::info!(
            %agent_id,
            branch = %worktree.branch,
            parent = %parent_ref,
            "Created worktree"
        );
        Ok(worktree)
    }

    /// Stage and commit all changes for a validation round, returning the
    /// resulting head sha (unchanged head when the tree was clean).
    pub async fn commit_for_validation(&self, agent_id: Uuid, iteration: i32) -> DomainResult<String> {
        let worktree = self.get_active(agent_id).await?;
        let dir = Path::new(&worktree.path);

        git(dir, &["add", "-A"]).await?;
        let dirty = !git(dir, &["status", "--porcelain"]).await?.is_empty();
        if dirty {
            let message = format!("Validation checkpoint {iteration}");
            git(dir, &["commit", "-m", &message]).await?;
            let sha = git(dir, &["rev-parse", "HEAD"]).await?;
            self.repo
                .record_commit(&WorktreeCommit::new(
                    agent_id,
                    &sha,
                    WorktreeCommitKind::ValidationReady,
                    message,
                ))
                .await?;
            return Ok(sha);
        }
        git(dir, &["rev-parse", "HEAD"]).await
    }

    /// Three-way merge of the agent's branch into its parent.
    ///
    /// Idempotent: when the child is already reachable from the parent (or
    /// the worktree is already merged), the current parent head is returned
    /// without touching the repository.
    pub async fn merge_to_parent(&self, agent_id: Uuid) -> DomainResult<String> {
        let mut worktree = self
            .repo
            .get_by_agent(agent_id)
            .await?
            .ok_or(DomainError::WorktreeNotFound(agent_id))?;

        let (parent_dir, parent_ref) = self.parent_merge_target(&worktree).await?;

        if worktree.merge_status == MergeStatus::Merged {
            return git(&parent_dir, &["rev-parse", "HEAD"]).await;
        }

        // Carry uncommitted work into the merge.
        let child_dir = Path::new(&worktree.path);
        git(child_dir, &["add", "-A"]).await?;
        if !git(child_dir, &["status", "--porcelain"]).await?.is_empty() {
            git(child_dir, &["commit", "-m", "Final commit before merge"]).await?;
            let sha = git(child_dir, &["rev-parse", "HEAD"]).await?;
            self.repo
                .record_commit(&WorktreeCommit::new(
                    agent_id,
                    &sha,
                    WorktreeCommitKind::Final,
                    "Final commit before merge",
                ))
                .await?;
        }

        // Already reachable → no-op returning the parent head.
        if git_ok(
            &parent_dir,
            &["merge-base", "--is-ancestor", &worktree.branch, "HEAD"],
        )
        .await?
        {
            let head = git(&parent_dir, &["rev-parse", "HEAD"]).await?;
            worktree.merged(&head);
            self.repo.update(&worktree).await?;
            return Ok(head);
        }

        let message = format!("Merge {} into {parent_ref}", worktree.branch);
        let merged_clean = git_ok(
            &parent_dir,
            &["merge", "--no-ff", &worktree.branch, "-m", &message],
        )
        .await?;

        if !merged_clean {
            self.resolve_conflicts(agent_id, &parent_dir, &worktree.branch)
                .await?;
            git(&parent_dir, &["commit", "--no-edit"]).await?;
        }

        let merge_sha = git(&parent_dir, &["rev-parse", "HEAD"]).await?;
        self.repo
            .record_commit(&WorktreeCommit::new(
                agent_id,
                &merge_sha,
                WorktreeCommitKind::Merge,
                message,
            ))
            .await?;

        worktree.merged(&merge_sha);
        self.repo.update(&worktree).await?;

        tracing::info!(%agent_id, %merge_sha, "Merged worktree into parent");
        Ok(merge_sha)
    }

    /// Mark the agent's worktree abandoned.
    pub async fn abandon(&self, agent_id: Uuid) -> DomainResult<()> {
        let mut worktree = self
            .repo
            .get_by_agent(agent_id)
            .await?
            .ok_or(DomainError::WorktreeNotFound(agent_id))?;
        worktree.abandon();
        self.repo.update(&worktree).await?;
        tracing::info!(%agent_id, "Worktree abandoned");
        Ok(())
    }

    /// Remove a merged/abandoned worktree from disk and delete its branch.
    pub async fn cleanup(&self, agent_id: Uuid) -> DomainResult<()> {
        let mut worktree = self
            .repo
            .get_by_agent(agent_id)
            .await?
            .ok_or(DomainError::WorktreeNotFound(agent_id))?;
        if worktree.merge_status == MergeStatus::Active {
            return Err(DomainError::InvalidArgument(
                "Refusing to clean an active worktree".to_string(),
            ));
        }

        if !git_ok(
            &self.main_repo_path,
            &["worktree", "remove", "--force", &worktree.path],
        )
        .await?
        {
            tracing::warn!(%agent_id, path = %worktree.path, "Worktree removal failed");
        }
        if !git_ok(&self.main_repo_path, &["branch", "-D", &worktree.branch]).await? {
            tracing::warn!(%agent_id, branch = %worktree.branch, "Branch deletion failed");
        }

        worktree.cleaned();
        self.repo.update(&worktree).await?;
        Ok(())
    }

    /// The worktree owned by an agent, if any.
    pub async fn get(&self, agent_id: Uuid) -> DomainResult<Option<Worktree>> {
        self.repo.get_by_agent(agent_id).await
    }

    async fn get_active(&self, agent_id: Uuid) -> DomainResult<Worktree> {
        let worktree = self
            .repo
            .get_by_agent(agent_id)
            .await?
            .ok_or(DomainError::WorktreeNotFound(agent_id))?;
        if worktree.merge_status != MergeStatus::Active {
            return Err(DomainError::InvalidArgument(format!(
                "Worktree for agent {agent_id} is {}",
                worktree.merge_status.as_str()
            )));
        }
        Ok(worktree)
    }

    /// Resolve the ref and sha a new worktree forks from.
    async fn resolve_parent(&self, parent_agent_id: Option<Uuid>) -> DomainResult<(String, String)> {
        if let Some(parent_id) = parent_agent_id {
            if let Some(parent_wt) = self.repo.get_by_agent(parent_id).await? {
                let sha = git(&self.main_repo_path, &["rev-parse", &parent_wt.branch]).await?;
                return Ok((parent_wt.branch, sha));
            }
            tracing::warn!(%parent_id, "Parent agent has no worktree; forking default branch");
        }
        let branch = git(&self.main_repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let sha = git(&self.main_repo_path, &["rev-parse", "HEAD"]).await?;
        Ok((branch, sha))
    }

    /// Directory and ref the merge lands in: the parent agent's worktree, or
    /// the main repository checkout.
    async fn parent_merge_target(&self, worktree: &Worktree) -> DomainResult<(PathBuf, String)> {
        if let Some(parent_id) = worktree.parent_agent_id {
            if let Some(parent_wt) = self.repo.get_by_agent(parent_id).await? {
                return Ok((PathBuf::from(&parent_wt.path), parent_wt.branch));
            }
        }
        let branch = git(&self.main_repo_path, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok((self.main_repo_path.clone(), branch))
    }

    /// Resolve every conflicted file by the timestamp rule and stage it.
    async fn resolve_conflicts(
        &self,
        agent_id: Uuid,
        parent_dir: &Path,
        child_branch: &str,
    ) -> DomainResult<()> {
        let conflicted = git(parent_dir, &["diff", "--name-only", "--diff-filter=U"]).await?;

        for file in conflicted.lines().filter(|l| !l.is_empty()) {
            let parent_time = last_commit_time(parent_dir, "HEAD", file).await;
            let child_time = last_commit_time(parent_dir, child_branch, file).await;

            // Newer modification wins; tie goes to the child.
            let choice = match (parent_time, child_time) {
                (Some(p), Some(c)) if p > c => ResolutionChoice::Parent,
                (Some(p), Some(c)) if p == c => ResolutionChoice::TieChild,
                (Some(_) | None, Some(_)) => ResolutionChoice::Child,
                (Some(_), None) => ResolutionChoice::Parent,
                (None, None) => ResolutionChoice::TieChild,
            };

            let side = match choice {
                ResolutionChoice::Parent => "--ours",
                ResolutionChoice::Child | ResolutionChoice::TieChild => "--theirs",
            };
            if !git_ok(parent_dir, &["checkout", side, "--", file]).await? {
                tracing::warn!(file, "Conflict checkout failed; keeping merged content");
            }
            git(parent_dir, &["add", "--", file]).await?;

            self.repo
                .record_conflict_resolution(&ConflictResolution {
                    agent_id,
                    file_path: file.to_string(),
                    parent_modified_at: parent_time,
                    child_modified_at: child_time,
                    resolution_choice: choice,
                    resolved_at: Utc::now(),
                })
                .await?;

            tracing::info!(file, choice = choice.as_str(), "Resolved merge conflict");
        }
        Ok(())
    }
}

/// Commit time of the last change to `file` on `rev`.
async fn last_commit_time(dir: &Path, rev: &str, file: &str) -> Option<DateTime<Utc>> {
    let output = git(dir, &["log", "-1", "--format=%ct", rev, "--", file])
        .await
        .ok()?;
    let epoch: i64 = output.parse().ok()?;
    Utc.timestamp_opt(epoch, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteWorktreeRepository,
    };
    use crate::domain::models::{Agent, AgentType};
    use crate::domain::ports::AgentRepository;
    use tempfile::TempDir;

    /// Init a git repo with one commit and identity configured locally.
    async fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-b", "main"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            git(dir, &args).await.unwrap();
        }
        tokio::fs::write(dir.join("README.md"), "hello\n").await.unwrap();
        git(dir, &["add", "-A"]).await.unwrap();
        git(dir, &["commit", "-m", "init"]).await.unwrap();
    }

    struct Fixture {
        _tmp: TempDir,
        manager: WorktreeManager,
        agents: SqliteAgentRepository,
        repo_path: PathBuf,
    }

    async fn setup() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let repo_path = tmp.path().join("repo");
        tokio::fs::create_dir_all(&repo_path).await.unwrap();
        init_repo(&repo_path).await;

        let pool = create_migrated_test_pool().await.unwrap();
        let wt_repo = Arc::new(SqliteWorktreeRepository::new(pool.clone()));
        let agents = SqliteAgentRepository::new(pool);

        let manager = WorktreeManager::new(
            wt_repo,
            repo_path.clone(),
            tmp.path().join("worktrees"),
        );
        Fixture { _tmp: tmp, manager, agents, repo_path }
    }

    async fn new_agent(fx: &Fixture) -> Uuid {
        let agent = Agent::new("p", "claude", AgentType::Phase, Uuid::new_v4());
        fx.agents.create(&agent).await.unwrap();
        agent.id
    }

    #[tokio::test]
    async fn test_create_worktree_on_fresh_branch() {
        let fx = setup().await;
        let agent_id = new_agent(&fx).await;

        let worktree = fx.manager.create(agent_id, None).await.unwrap();
        assert!(Path::new(&worktree.path).join("README.md").exists());
        assert_eq!(worktree.merge_status, MergeStatus::Active);

        let branch = git(Path::new(&worktree.path), &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .unwrap();
        assert_eq!(branch, worktree.branch);
    }

    #[tokio::test]
    async fn test_commit_for_validation_and_merge() {
        let fx = setup().await;
        let agent_id = new_agent(&fx).await;
        let worktree = fx.manager.create(agent_id, None).await.unwrap();

        tokio::fs::write(Path::new(&worktree.path).join("feature.rs"), "fn f() {}\n")
            .await
            .unwrap();
        let sha = fx.manager.commit_for_validation(agent_id, 1).await.unwrap();
        assert_eq!(sha.len(), 40);

        let merge_sha = fx.manager.merge_to_parent(agent_id).await.unwrap();
        assert!(fx.repo_path.join("feature.rs").exists());

        let head = git(&fx.repo_path, &["rev-parse", "HEAD"]).await.unwrap();
        assert_eq!(merge_sha, head);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let fx = setup().await;
        let agent_id = new_agent(&fx).await;
        let worktree = fx.manager.create(agent_id, None).await.unwrap();

        tokio::fs::write(Path::new(&worktree.path).join("a.txt"), "a\n").await.unwrap();
        fx.manager.commit_for_validation(agent_id, 1).await.unwrap();

        let first = fx.manager.merge_to_parent(agent_id).await.unwrap();
        let second = fx.manager.merge_to_parent(agent_id).await.unwrap();
        assert_eq!(first, second);

        let head = git(&fx.repo_path, &["rev-parse", "HEAD"]).await.unwrap();
        assert_eq!(head, first);
    }

    #[tokio::test]
    async fn test_conflict_resolved_toward_child() {
        let fx = setup().await;
        let agent_id = new_agent(&fx).await;
        let worktree = fx.manager.create(agent_id, None).await.unwrap();

        // Parent edits README first, child edits it later.
        tokio::fs::write(fx.repo_path.join("README.md"), "parent change\n")
            .await
            .unwrap();
        git(&fx.repo_path, &["commit", "-am", "parent edit"]).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        tokio::fs::write(Path::new(&worktree.path).join("README.md"), "child change\n")
            .await
            .unwrap();
        git(Path::new(&worktree.path), &["commit", "-am", "child edit"])
            .await
            .unwrap();

        fx.manager.merge_to_parent(agent_id).await.unwrap();

        let merged = tokio::fs::read_to_string(fx.repo_path.join("README.md"))
            .await
            .unwrap();
        assert_eq!(merged, "child change\n");

        let resolutions = fx.manager.repo.list_conflict_resolutions(agent_id).await.unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(resolutions[0].resolution_choice, ResolutionChoice::Child);
    }

    #[tokio::test]
    async fn test_abandon_then_cleanup() {
        let fx = setup().await;
        let agent_id = new_agent(&fx).await;
        let worktree = fx.manager.create(agent_id, None).await.unwrap();

        fx.manager.abandon(agent_id).await.unwrap();
        fx.manager.cleanup(agent_id).await.unwrap();

        assert!(!Path::new(&worktree.path).exists());
        let stored = fx.manager.get(agent_id).await.unwrap().unwrap();
        assert_eq!(stored.merge_status, MergeStatus::Cleaned);
    }

    #[tokio::test]
    async fn test_nested_worktree_forks_parent_branch() {
        let fx = setup().await;
        let parent_id = new_agent(&fx).await;
        let child_id = new_agent(&fx).await;

        let parent_wt = fx.manager.create(parent_id, None).await.unwrap();
        tokio::fs::write(Path::new(&parent_wt.path).join("parent.txt"), "p\n")
            .await
            .unwrap();
        git(Path::new(&parent_wt.path), &["add", "-A"]).await.unwrap();
        git(Path::new(&parent_wt.path), &["commit", "-m", "parent work"])
            .await
            .unwrap();

        let child_wt = fx.manager.create(child_id, Some(parent_id)).await.unwrap();
        assert!(Path::new(&child_wt.path).join("parent.txt").exists());
        assert_eq!(child_wt.parent_agent_id, Some(parent_id));
    }
}
