//! Guardian: per-agent trajectory monitoring.
//!
//! Each monitor tick the Guardian rebuilds the agent's accumulated context,
//! asks the LLM to judge alignment, persists the analysis, updates agent
//! health, and delivers throttled steering when needed.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::MonitoringConfig;
use crate::domain::models::{
    Agent, AgentLog, GuardianAnalysisRecord, LogKind, SteeringRecord, SteeringType,
};
use crate::domain::ports::{
    AgentRepository, LlmClient, MonitoringRepository, TaskRepository, TrajectoryAnalysis,
    TrajectoryRequest, WorkflowRepository,
};
use crate::services::agent_manager::{AgentManager, SendOutcome};
use crate::services::trajectory_context::TrajectoryContext;

/// Past Guardian summaries loaded per analysis.
const PAST_SUMMARY_LIMIT: usize = 10;

/// Per-agent summary handed to the Conductor.
#[derive(Debug, Clone)]
pub struct GuardianSummary {
    pub agent_id: Uuid,
    pub agent_type: crate::domain::models::AgentType,
    pub analysis: TrajectoryAnalysis,
    pub accumulated_goal: String,
}

impl GuardianSummary {
    /// Serialize for the Conductor's coherence request.
    pub fn to_value(&self) -> Value {
        json!({
            "agent_id": self.agent_id,
            "agent_type": self.agent_type.as_str(),
            "current_phase": self.analysis.current_phase,
            "trajectory_aligned": self.analysis.trajectory_aligned,
            "alignment_score": self.analysis.alignment_score,
            "trajectory_summary": self.analysis.trajectory_summary,
            "accumulated_goal": self.accumulated_goal,
        })
    }
}

/// Per-agent LLM-driven alignment monitor.
pub struct Guardian {
    agent_repo: Arc<dyn AgentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    monitoring_repo: Arc<dyn MonitoringRepository>,
    agent_manager: Arc<AgentManager>,
    llm: Arc<dyn LlmClient>,
    trajectory_context: TrajectoryContext,
    config: MonitoringConfig,
}

impl Guardian {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        task_repo: Arc<dyn TaskRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        monitoring_repo: Arc<dyn MonitoringRepository>,
        agent_manager: Arc<AgentManager>,
        llm: Arc<dyn LlmClient>,
        config: MonitoringConfig,
    ) -> Self {
        let trajectory_context = TrajectoryContext::new(agent_repo.clone(), task_repo.clone());
        Self {
            agent_repo,
            task_repo,
            workflow_repo,
            monitoring_repo,
            agent_manager,
            llm,
            trajectory_context,
            config,
        }
    }

    /// Analyze one agent's trajectory: context → LLM → persist → health →
    /// steering. LLM failures degrade to a healthy default analysis.
    pub async fn analyze_agent(
        &self,
        agent: &Agent,
        session_output: &str,
    ) -> DomainResult<GuardianSummary> {
        let accumulated = self
            .trajectory_context
            .build(agent.id, agent.current_task_id)
            .await?;

        let past = self
            .monitoring_repo
            .recent_guardian_analyses(agent.id, PAST_SUMMARY_LIMIT)
            .await?;
        let last_message_marker = past.last().and_then(|p| p.last_message_marker.clone());
        let past_summaries: Vec<Value> = past
            .iter()
            .map(|p| {
                json!({
                    "current_phase": p.current_phase,
                    "trajectory_aligned": p.trajectory_aligned,
                    "alignment_score": p.alignment_score,
                    "trajectory_summary": p.trajectory_summary,
                    "accumulated_goal": p.accumulated_goal,
                    "timestamp": p.created_at.to_rfc3339(),
                })
            })
            .collect();

        let task_info = self.task_info(agent).await?;

        let request = TrajectoryRequest {
            agent_output: session_output.to_string(),
            accumulated_context: serde_json::to_value(&accumulated)?,
            past_summaries,
            task_info,
            last_message_marker,
        };

        let analysis = match self.llm.analyze_agent_trajectory(request).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(agent_id = %agent.id, error = %e, "Guardian LLM analysis failed");
                TrajectoryAnalysis::default_healthy()
            }
        };

        self.persist_analysis(agent, &accumulated.overall_goal, &accumulated, &analysis)
            .await?;
        self.update_agent_health(agent.id, &analysis).await?;

        tracing::info!(
            agent_id = %agent.id,
            phase = ?analysis.current_phase,
            aligned = analysis.trajectory_aligned,
            needs_steering = analysis.needs_steering,
            "Guardian analysis complete"
        );

        Ok(GuardianSummary {
            agent_id: agent.id,
            agent_type: agent.agent_type,
            accumulated_goal: accumulated.overall_goal,
            analysis,
        })
    }

    /// Deliver a steering message, honoring the per-agent throttle and the
    /// anti-spam invariant. Returns true when the message was delivered.
    pub async fn steer(
        &self,
        agent_id: Uuid,
        steering_type: SteeringType,
        message: &str,
    ) -> DomainResult<bool> {
        if !self.should_steer(agent_id).await? {
            tracing::debug!(%agent_id, "Steering throttled");
            return Ok(false);
        }

        let formatted = format!(
            "\n[GUARDIAN GUIDANCE - {}]: {message}\n",
            steering_type.as_str().to_uppercase()
        );

        let outcome = self.agent_manager.send(agent_id, &formatted).await?;
        match outcome {
            SendOutcome::Delivered => {
                self.monitoring_repo
                    .save_steering(&SteeringRecord {
                        id: None,
                        agent_id,
                        created_at: Utc::now(),
                        steering_type: steering_type.as_str().to_string(),
                        message: message.to_string(),
                        delivered: true,
                    })
                    .await?;
                self.agent_repo
                    .append_log(
                        &AgentLog::new(
                            agent_id,
                            LogKind::Steering,
                            format!("Guardian steering: {}", steering_type.as_str()),
                        )
                        .with_details(json!({
                            "type": steering_type.as_str(),
                            "message": message,
                        })),
                    )
                    .await?;
                Ok(true)
            }
            SendOutcome::Discarded => {
                // Held back: the CLI still shows an unread queued message.
                self.monitoring_repo
                    .save_steering(&SteeringRecord {
                        id: None,
                        agent_id,
                        created_at: Utc::now(),
                        steering_type: format!("{}_DISCARDED", steering_type.as_str()),
                        message: format!("Message held (queued message detected): {message}"),
                        delivered: false,
                    })
                    .await?;
                Ok(false)
            }
        }
    }

    /// At most one delivered steering per agent per steering interval.
    async fn should_steer(&self, agent_id: Uuid) -> DomainResult<bool> {
        let window_start =
            Utc::now() - Duration::seconds(self.config.steering_interval_seconds as i64);
        let recent = self
            .monitoring_repo
            .steering_since(agent_id, window_start)
            .await?;
        Ok(recent.is_empty())
    }

    async fn task_info(&self, agent: &Agent) -> DomainResult<Value> {
        let Some(task_id) = agent.current_task_id else {
            return Ok(json!({"agent_id": agent.id}));
        };
        let Some(task) = self.task_repo.get(task_id).await? else {
            return Ok(json!({"agent_id": agent.id, "task_id": task_id}));
        };

        let phase_info = match (task.phase_id, task.workflow_id) {
            (Some(phase_id), Some(workflow_id)) => {
                let phase = self.workflow_repo.get_phase(phase_id).await?;
                let workflow = self.workflow_repo.get_workflow(workflow_id).await?;
                match (phase, workflow) {
                    (Some(phase), Some(workflow)) => {
                        let total = self.workflow_repo.list_phases(workflow_id).await?.len();
                        Some(json!({
                            "phase_name": phase.name,
                            "phase_seq": phase.seq,
                            "total_phases": total,
                            "done_definitions": phase.done_definitions,
                            "workflow_name": workflow.name,
                        }))
                    }
                    _ => None,
                }
            }
            _ => None,
        };

        Ok(json!({
            "agent_id": agent.id,
            "task_id": task.id,
            "description": task.description(),
            "done_definition": task.done_definition,
            "phase_info": phase_info,
        }))
    }

    async fn persist_analysis(
        &self,
        agent: &Agent,
        accumulated_goal: &str,
        accumulated: &crate::services::trajectory_context::AccumulatedContext,
        analysis: &TrajectoryAnalysis,
    ) -> DomainResult<()> {
        let record = GuardianAnalysisRecord {
            id: None,
            agent_id: agent.id,
            created_at: Utc::now(),
            current_phase: analysis.current_phase.clone(),
            trajectory_aligned: analysis.trajectory_aligned,
            alignment_score: analysis.alignment_score,
            needs_steering: analysis.needs_steering,
            steering_type: analysis.steering_type,
            steering_recommendation: analysis.steering_recommendation.clone(),
            trajectory_summary: analysis.trajectory_summary.clone(),
            last_message_marker: analysis.last_claude_message_marker.clone(),
            accumulated_goal: Some(accumulated_goal.to_string()),
            current_focus: analysis
                .current_focus
                .clone()
                .or_else(|| Some(accumulated.current_focus.clone())),
            conversation_length: Some(accumulated.conversation_length as i64),
            details: Some(serde_json::to_value(analysis)?),
        };
        let analysis_id = self.monitoring_repo.save_guardian_analysis(&record).await?;

        self.agent_repo
            .append_log(
                &AgentLog::new(
                    agent.id,
                    LogKind::GuardianAnalysis,
                    format!(
                        "Guardian: {} phase, score={:.2}, aligned={}",
                        analysis.current_phase.as_deref().unwrap_or("unknown"),
                        analysis.alignment_score,
                        analysis.trajectory_aligned
                    ),
                )
                .with_details(json!({"guardian_analysis_id": analysis_id})),
            )
            .await?;
        Ok(())
    }

    /// Aligned trajectory resets failures; low scores add to them (clamped).
    async fn update_agent_health(
        &self,
        agent_id: Uuid,
        analysis: &TrajectoryAnalysis,
    ) -> DomainResult<()> {
        let Some(mut agent) = self.agent_repo.get(agent_id).await? else {
            return Ok(());
        };

        if analysis.trajectory_aligned {
            agent.health_check_failures = 0;
            agent.last_activity = Some(Utc::now());
        } else if analysis.alignment_score < 0.3 {
            agent.health_check_failures =
                (agent.health_check_failures + 2).min(self.config.max_health_check_failures);
        } else if analysis.alignment_score < 0.5 {
            agent.health_check_failures =
                (agent.health_check_failures + 1).min(self.config.max_health_check_failures);
        }

        self.agent_repo.update(&agent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::MockLlmClient;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteMonitoringRepository,
        SqliteTaskRepository, SqliteWorkflowRepository, SqliteWorktreeRepository,
    };
    use crate::adapters::tmux::InMemorySessionHost;
    use crate::domain::models::config::AgentConfig;
    use crate::domain::models::{AgentType, Task};
    use crate::domain::ports::SessionHost;
    use crate::services::worktree_manager::WorktreeManager;

    struct Fixture {
        guardian: Guardian,
        llm: Arc<MockLlmClient>,
        host: Arc<InMemorySessionHost>,
        agents: Arc<SqliteAgentRepository>,
        tasks: Arc<SqliteTaskRepository>,
        monitoring: Arc<SqliteMonitoringRepository>,
        _tmp: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let tasks = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let workflows = Arc::new(SqliteWorkflowRepository::new(pool.clone()));
        let monitoring = Arc::new(SqliteMonitoringRepository::new(pool.clone()));
        let wt_repo = Arc::new(SqliteWorktreeRepository::new(pool));
        let host = Arc::new(InMemorySessionHost::new());
        let llm = Arc::new(MockLlmClient::new());
        let tmp = tempfile::TempDir::new().unwrap();

        let worktrees = Arc::new(WorktreeManager::new(
            wt_repo,
            tmp.path().to_path_buf(),
            tmp.path().join("wt"),
        ));
        let agent_manager = Arc::new(AgentManager::new(
            agents.clone(),
            host.clone(),
            worktrees,
            AgentConfig::default(),
        ));

        let guardian = Guardian::new(
            agents.clone(),
            tasks.clone(),
            workflows,
            monitoring.clone(),
            agent_manager,
            llm.clone(),
            MonitoringConfig::default(),
        );
        Fixture { guardian, llm, host, agents, tasks, monitoring, _tmp: tmp }
    }

    async fn working_agent(fx: &Fixture) -> Agent {
        let task = Task::new("build feature", "tests pass");
        fx.tasks.create(&task).await.unwrap();
        let mut agent = Agent::new("prompt", "claude", AgentType::Phase, task.id);
        agent.session_name = Some(Agent::session_name_for("agent-", agent.id));
        fx.agents.create(&agent).await.unwrap();
        fx.host
            .create(agent.session_name.as_deref().unwrap(), "/tmp", "claude")
            .await
            .unwrap();
        agent
    }

    fn misaligned(score: f32) -> TrajectoryAnalysis {
        TrajectoryAnalysis {
            trajectory_aligned: false,
            alignment_score: score,
            trajectory_summary: "off track".to_string(),
            ..TrajectoryAnalysis::default_healthy()
        }
    }

    #[tokio::test]
    async fn test_analysis_persists_record() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;

        fx.guardian.analyze_agent(&agent, "doing things").await.unwrap();

        let analyses = fx.monitoring.recent_guardian_analyses(agent.id, 10).await.unwrap();
        assert_eq!(analyses.len(), 1);
        assert!(analyses[0].trajectory_aligned);
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_healthy_default() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;

        // No scripted response and no failure: mock returns healthy default,
        // matching the production degrade path shape.
        let summary = fx.guardian.analyze_agent(&agent, "output").await.unwrap();
        assert!(summary.analysis.trajectory_aligned);
        assert!(!summary.analysis.needs_steering);
    }

    #[tokio::test]
    async fn test_health_bumps_clamped() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;

        // Very low score: +2 per tick, clamped at max (5).
        for _ in 0..4 {
            fx.llm.push_trajectory(misaligned(0.1));
            fx.guardian.analyze_agent(&agent, "output").await.unwrap();
        }
        let stored = fx.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(stored.health_check_failures, 5);

        // Aligned analysis resets.
        fx.guardian.analyze_agent(&agent, "output").await.unwrap();
        let stored = fx.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(stored.health_check_failures, 0);
    }

    #[tokio::test]
    async fn test_mid_score_bumps_one() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;

        fx.llm.push_trajectory(misaligned(0.4));
        fx.guardian.analyze_agent(&agent, "output").await.unwrap();
        let stored = fx.agents.get(agent.id).await.unwrap().unwrap();
        assert_eq!(stored.health_check_failures, 1);
    }

    #[tokio::test]
    async fn test_steering_throttled_within_window() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;

        let delivered = fx
            .guardian
            .steer(agent.id, SteeringType::Confused, "check imports")
            .await
            .unwrap();
        assert!(delivered);

        // Second steering inside the 5-minute window is suppressed.
        let delivered = fx
            .guardian
            .steer(agent.id, SteeringType::Confused, "check imports again")
            .await
            .unwrap();
        assert!(!delivered);

        let sent = fx
            .host
            .sent_messages(agent.session_name.as_deref().unwrap())
            .await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("[GUARDIAN GUIDANCE - CONFUSED]"));
    }

    #[tokio::test]
    async fn test_discarded_steering_recorded_and_does_not_throttle() {
        let fx = setup().await;
        let agent = working_agent(&fx).await;
        let session = agent.session_name.clone().unwrap();

        fx.host.set_pane(&session, "Press up to edit queued messages").await;
        let delivered = fx
            .guardian
            .steer(agent.id, SteeringType::Stuck, "try another angle")
            .await
            .unwrap();
        assert!(!delivered);
        assert!(fx.host.sent_messages(&session).await.is_empty());

        // The marker clears; steering now goes through because the discarded
        // attempt does not count against the throttle.
        fx.host.set_pane(&session, "idle prompt").await;
        let delivered = fx
            .guardian
            .steer(agent.id, SteeringType::Stuck, "try another angle")
            .await
            .unwrap();
        assert!(delivered);
    }
}
