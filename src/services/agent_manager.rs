//! Agent lifecycle: spawn, message delivery, output capture, termination.
//!
//! Each agent lives inside a terminal-multiplexer session running the
//! configured CLI in its own worktree. Message delivery honors the anti-spam
//! invariant: a send is discarded when the CLI still holds an unread queued
//! message.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::AgentConfig;
use crate::domain::models::{
    Agent, AgentLog, AgentStatus, AgentType, LogKind, Task,
};
use crate::domain::ports::{AgentRepository, SessionHost};
use crate::services::worktree_manager::WorktreeManager;

/// Pane marker meaning the CLI holds an unread message.
pub const QUEUED_MESSAGE_MARKER: &str = "queued messages";

/// Lines inspected before a send for the queued-message marker.
const PRE_SEND_CAPTURE_LINES: usize = 50;

/// Lines archived into the terminal transcript on termination.
const TERMINATION_CAPTURE_LINES: usize = 10_000;

/// Outcome of a message delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Withheld: the session still shows an unread queued message.
    Discarded,
}

/// Everything needed to spawn an agent for a task.
pub struct SpawnRequest<'a> {
    pub task: &'a Task,
    pub enriched_description: String,
    pub memories: Vec<String>,
    pub project_context: String,
    /// Phase context block, when the task belongs to a phase
    pub phase_context: Option<String>,
    pub agent_type: AgentType,
    /// Skip worktree allocation and run at `working_dir` directly
    pub use_existing_worktree: bool,
    /// Working directory override (diagnostic agents run in the main repo)
    pub working_dir: Option<String>,
    /// Fork from this agent's branch instead of the default branch
    pub parent_agent_id: Option<Uuid>,
    /// Fully custom initial prompt (diagnostic and validator agents)
    pub prompt_override: Option<String>,
}

/// Manages live agent sessions. All session access goes through here.
pub struct AgentManager {
    agent_repo: Arc<dyn AgentRepository>,
    session_host: Arc<dyn SessionHost>,
    worktree_manager: Arc<WorktreeManager>,
    config: AgentConfig,
}

impl AgentManager {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        session_host: Arc<dyn SessionHost>,
        worktree_manager: Arc<WorktreeManager>,
        config: AgentConfig,
    ) -> Self {
        Self { agent_repo, session_host, worktree_manager, config }
    }

    pub fn session_prefix(&self) -> &str {
        &self.config.session_prefix
    }

    /// Spawn an agent for a task: allocate a worktree (unless reusing a
    /// directory), create the session, deliver the initial prompt.
    pub async fn spawn(&self, request: SpawnRequest<'_>) -> DomainResult<Agent> {
        let prompt = request.prompt_override.clone().unwrap_or_else(|| {
            compose_initial_prompt(
                request.task,
                &request.enriched_description,
                &request.memories,
                &request.project_context,
                request.phase_context.as_deref(),
            )
        });

        let mut agent = Agent::new(
            prompt.clone(),
            self.config.cli_command.clone(),
            request.agent_type,
            request.task.id,
        );
        agent.session_name = Some(Agent::session_name_for(&self.config.session_prefix, agent.id));

        let working_dir = if request.use_existing_worktree {
            request.working_dir.clone().ok_or_else(|| {
                DomainError::InvalidArgument(
                    "use_existing_worktree requires a working_dir".to_string(),
                )
            })?
        } else {
            // Persist the agent before the worktree so the worktree row has
            // its owner; the session comes last.
            self.agent_repo.create(&agent).await?;
            let worktree = self
                .worktree_manager
                .create(agent.id, request.parent_agent_id)
                .await?;
            worktree.path
        };

        if request.use_existing_worktree {
            self.agent_repo.create(&agent).await?;
        }

        let session_name = agent.session_name.clone().unwrap_or_default();
        self.session_host
            .create(&session_name, &working_dir, &self.config.cli_command)
            .await?;
        self.session_host.send(&session_name, &prompt).await?;

        self.agent_repo
            .append_log(&AgentLog::new(agent.id, LogKind::Input, prompt).with_details(json!({
                "task_id": request.task.id,
                "agent_type": request.agent_type.as_str(),
                "working_dir": working_dir,
            })))
            .await?;

        tracing::info!(
            agent_id = %agent.id,
            session = %session_name,
            agent_type = request.agent_type.as_str(),
            task_id = %request.task.id,
            "Spawned agent"
        );
        Ok(agent)
    }

    /// Deliver a message to an agent's session.
    ///
    /// Before delivery the trailing pane is inspected; when it contains the
    /// queued-message marker the send is discarded and logged instead of
    /// overwriting the unread message.
    pub async fn send(&self, agent_id: Uuid, text: &str) -> DomainResult<SendOutcome> {
        let agent = self.require_agent(agent_id).await?;
        let session_name = agent
            .session_name
            .ok_or_else(|| DomainError::SessionError(format!("Agent {agent_id} has no session")))?;

        let recent = self
            .session_host
            .capture(&session_name, PRE_SEND_CAPTURE_LINES)
            .await
            .unwrap_or_default();
        if recent.contains(QUEUED_MESSAGE_MARKER) {
            let preview: String = text.chars().take(100).collect();
            tracing::info!(
                %agent_id,
                preview,
                "Discarding message - previous message still queued"
            );
            return Ok(SendOutcome::Discarded);
        }

        self.session_host.send(&session_name, text).await?;
        self.agent_repo
            .append_log(&AgentLog::new(agent_id, LogKind::Message, text))
            .await?;
        Ok(SendOutcome::Delivered)
    }

    /// Trailing output of an agent. Live agents read from the session;
    /// terminated agents read from the archived transcript.
    pub async fn output(&self, agent_id: Uuid, lines: usize) -> DomainResult<String> {
        let agent = self.require_agent(agent_id).await?;

        if agent.status == AgentStatus::Terminated {
            let transcript = self
                .agent_repo
                .latest_log_of_kind(agent_id, LogKind::Terminated)
                .await?;
            let Some(log) = transcript else {
                return Ok("Agent terminated - no output was captured".to_string());
            };
            let full = log
                .details
                .as_ref()
                .and_then(|d| d["final_output"].as_str())
                .unwrap_or_default();
            let tail: Vec<&str> = full.lines().collect();
            let start = tail.len().saturating_sub(lines);
            return Ok(tail[start..].join("\n"));
        }

        let session_name = agent
            .session_name
            .ok_or_else(|| DomainError::SessionError(format!("Agent {agent_id} has no session")))?;
        self.session_host.capture(&session_name, lines).await
    }

    /// Terminate an agent: archive the transcript, kill the session, mark
    /// terminated. Capture failure still kills and archives an empty
    /// transcript.
    pub async fn terminate(&self, agent_id: Uuid) -> DomainResult<()> {
        let Some(mut agent) = self.agent_repo.get(agent_id).await? else {
            tracing::warn!(%agent_id, "Terminate requested for unknown agent");
            return Ok(());
        };
        if agent.status == AgentStatus::Terminated {
            return Ok(());
        }

        let final_output = match &agent.session_name {
            Some(session) => self
                .session_host
                .capture(session, TERMINATION_CAPTURE_LINES)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(%agent_id, error = %e, "Output capture failed during terminate");
                    String::new()
                }),
            None => String::new(),
        };
        let output_lines = if final_output.is_empty() {
            0
        } else {
            final_output.lines().count()
        };

        self.agent_repo
            .append_log(
                &AgentLog::new(agent_id, LogKind::Terminated, "Agent terminated").with_details(
                    json!({
                        "final_output": final_output,
                        "output_lines": output_lines,
                        "captured_at": Utc::now().to_rfc3339(),
                    }),
                ),
            )
            .await?;

        if let Some(session) = &agent.session_name {
            if let Err(e) = self.session_host.kill(session).await {
                tracing::warn!(%agent_id, error = %e, "Session kill failed");
            }
        }

        agent.status = AgentStatus::Terminated;
        agent.last_activity = Some(Utc::now());
        self.agent_repo.update(&agent).await?;

        tracing::info!(%agent_id, output_lines, "Agent terminated");
        Ok(())
    }

    /// Re-create the session for an agent whose session vanished, keeping the
    /// same id and state, and re-deliver the stored system prompt.
    pub async fn restart(&self, agent_id: Uuid, reason: &str) -> DomainResult<()> {
        let agent = self.require_agent(agent_id).await?;
        let session_name = agent
            .session_name
            .clone()
            .ok_or_else(|| DomainError::SessionError(format!("Agent {agent_id} has no session")))?;

        let working_dir = match self.worktree_manager.get(agent_id).await? {
            Some(worktree) => worktree.path,
            None => ".".to_string(),
        };

        if self.session_host.has(&session_name).await? {
            self.session_host.kill(&session_name).await?;
        }
        self.session_host
            .create(&session_name, &working_dir, &agent.cli_type)
            .await?;
        self.session_host
            .send(&session_name, &agent.system_prompt)
            .await?;

        self.agent_repo
            .append_log(
                &AgentLog::new(agent_id, LogKind::Intervention, format!("Agent restarted: {reason}"))
                    .with_details(json!({"reason": reason})),
            )
            .await?;

        tracing::info!(%agent_id, reason, "Agent session recreated");
        Ok(())
    }

    /// All agents that still hold a concurrency slot.
    pub async fn active_agents(&self) -> DomainResult<Vec<Agent>> {
        self.agent_repo.list_active().await
    }

    /// Whether the agent's session currently exists.
    pub async fn session_alive(&self, agent: &Agent) -> DomainResult<bool> {
        match &agent.session_name {
            Some(name) => self.session_host.has(name).await,
            None => Ok(false),
        }
    }

    /// Live session names not owned by any non-terminated agent.
    pub async fn orphaned_sessions(&self) -> DomainResult<Vec<String>> {
        let sessions = self.session_host.list().await?;
        let active = self.agent_repo.list_active().await?;
        let owned: std::collections::HashSet<String> =
            active.into_iter().filter_map(|a| a.session_name).collect();

        Ok(sessions
            .into_iter()
            .filter(|s| s.starts_with(&self.config.session_prefix) && !owned.contains(s))
            .collect())
    }

    /// Kill a named session (orphan GC).
    pub async fn kill_session(&self, name: &str) -> DomainResult<()> {
        self.session_host.kill(name).await
    }

    async fn require_agent(&self, agent_id: Uuid) -> DomainResult<Agent> {
        self.agent_repo
            .get(agent_id)
            .await?
            .ok_or(DomainError::AgentNotFound(agent_id))
    }
}

/// Compose the initial system prompt for a task agent.
fn compose_initial_prompt(
    task: &Task,
    enriched_description: &str,
    memories: &[String],
    project_context: &str,
    phase_context: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are an autonomous coding agent working on the following task.\n\n\
         ## Task\n{enriched_description}\n\n\
         ## Definition of done\n{}\n\n\
         Task id: {}\n",
        task.done_definition, task.id
    ));

    if let Some(phase) = phase_context {
        prompt.push('\n');
        prompt.push_str(phase);
        prompt.push('\n');
    }

    if !project_context.is_empty() {
        prompt.push_str(&format!("\n## Project context\n{project_context}\n"));
    }

    if !memories.is_empty() {
        prompt.push_str("\n## Relevant notes from earlier work\n");
        for memory in memories {
            prompt.push_str(&format!("- {memory}\n"));
        }
    }

    prompt.push_str(
        "\nWork in the current directory. Commit meaningful progress. \
         Report done only when the definition of done is met.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteTaskRepository,
        SqliteWorktreeRepository,
    };
    use crate::adapters::tmux::InMemorySessionHost;
    use crate::domain::ports::TaskRepository;

    struct Fixture {
        manager: AgentManager,
        host: Arc<InMemorySessionHost>,
        agents: Arc<SqliteAgentRepository>,
        tasks: Arc<SqliteTaskRepository>,
        workdir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let wt_repo = Arc::new(SqliteWorktreeRepository::new(pool));
        let host = Arc::new(InMemorySessionHost::new());
        let workdir = tempfile::TempDir::new().unwrap();

        // Worktree manager points at a directory that is never used because
        // these tests spawn with use_existing_worktree.
        let worktrees = Arc::new(WorktreeManager::new(
            wt_repo,
            workdir.path().to_path_buf(),
            workdir.path().join("wt"),
        ));

        let manager = AgentManager::new(
            agents.clone(),
            host.clone(),
            worktrees,
            AgentConfig::default(),
        );
        Fixture { manager, host, agents, tasks, workdir }
    }

    async fn spawn_agent(fx: &Fixture) -> Agent {
        let task = Task::new("build the parser", "parses the fixture file");
        fx.tasks.create(&task).await.unwrap();
        fx.manager
            .spawn(SpawnRequest {
                task: &task,
                enriched_description: "Build the parser module".to_string(),
                memories: vec!["prefer nom-style combinators".to_string()],
                project_context: "Rust workspace".to_string(),
                phase_context: None,
                agent_type: AgentType::Phase,
                use_existing_worktree: true,
                working_dir: Some(fx.workdir.path().to_string_lossy().into_owned()),
                parent_agent_id: None,
                prompt_override: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_spawn_creates_session_and_delivers_prompt() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;

        let session = agent.session_name.clone().unwrap();
        assert!(fx.host.has(&session).await.unwrap());

        let sent = fx.host.sent_messages(&session).await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Build the parser module"));
        assert!(sent[0].contains("prefer nom-style combinators"));

        let logs = fx.agents.logs_for_agent(agent.id, &[LogKind::Input]).await.unwrap();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_send_discards_when_message_queued() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;
        let session = agent.session_name.clone().unwrap();

        fx.host
            .set_pane(&session, "some output\nPress up to edit queued messages")
            .await;
        let outcome = fx.manager.send(agent.id, "steering text").await.unwrap();
        assert_eq!(outcome, SendOutcome::Discarded);
        assert_eq!(fx.host.sent_messages(&session).await.len(), 1); // prompt only

        fx.host.set_pane(&session, "agent is idle now").await;
        let outcome = fx.manager.send(agent.id, "steering text").await.unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(fx.host.sent_messages(&session).await.len(), 2);
    }

    #[tokio::test]
    async fn test_terminate_archives_transcript() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;
        let session = agent.session_name.clone().unwrap();
        fx.host.set_pane(&session, "line 1\nline 2\nline 3").await;

        fx.manager.terminate(agent.id).await.unwrap();

        let stored = fx.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Terminated);
        assert!(!fx.host.has(&session).await.unwrap());

        let log = fx
            .agents
            .latest_log_of_kind(agent.id, LogKind::Terminated)
            .await
            .unwrap()
            .unwrap();
        let details = log.details.unwrap();
        assert_eq!(details["final_output"], "line 1\nline 2\nline 3");
        assert_eq!(details["output_lines"], 3);

        // Exactly one terminated transcript exists.
        let all = fx.agents.logs_for_agent(agent.id, &[LogKind::Terminated]).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_twice_is_idempotent() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;
        fx.manager.terminate(agent.id).await.unwrap();
        fx.manager.terminate(agent.id).await.unwrap();

        let all = fx.agents.logs_for_agent(agent.id, &[LogKind::Terminated]).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_output_reads_transcript_after_termination() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;
        let session = agent.session_name.clone().unwrap();
        fx.host.set_pane(&session, "a\nb\nc\nd").await;
        fx.manager.terminate(agent.id).await.unwrap();

        let tail = fx.manager.output(agent.id, 2).await.unwrap();
        assert_eq!(tail, "c\nd");
    }

    #[tokio::test]
    async fn test_orphaned_sessions_detected() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;

        // An agent-prefixed session nobody owns, plus a foreign session.
        fx.host.create("agent-deadbeef", "/tmp", "claude").await.unwrap();
        fx.host.create("unrelated", "/tmp", "bash").await.unwrap();

        let orphans = fx.manager.orphaned_sessions().await.unwrap();
        assert_eq!(orphans, vec!["agent-deadbeef".to_string()]);

        // Terminating the real agent orphans nothing: its session is gone.
        fx.manager.terminate(agent.id).await.unwrap();
        let orphans = fx.manager.orphaned_sessions().await.unwrap();
        assert_eq!(orphans, vec!["agent-deadbeef".to_string()]);
    }

    #[tokio::test]
    async fn test_restart_recreates_session() {
        let fx = setup().await;
        let agent = spawn_agent(&fx).await;
        let session = agent.session_name.clone().unwrap();

        fx.host.kill(&session).await.unwrap();
        assert!(!fx.host.has(&session).await.unwrap());

        fx.manager.restart(agent.id, "session missing").await.unwrap();
        assert!(fx.host.has(&session).await.unwrap());

        let sent = fx.host.sent_messages(&session).await;
        assert_eq!(sent.len(), 1); // prompt re-delivered into the new session
    }
}
