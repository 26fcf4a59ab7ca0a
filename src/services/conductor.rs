//! Conductor: system-wide coherence monitoring.
//!
//! Takes the current tick's Guardian summaries, asks the LLM for a coherence
//! judgment, converts the answer into decisions (terminate duplicate,
//! coordinate resources, escalate), and executes them. Validator-type agents
//! are never terminated for duplication.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    AgentLog, ConductorAnalysisRecord, DetectedDuplicateRecord, LogKind,
};
use crate::domain::ports::{
    AgentRepository, CoherenceAnalysis, CoherenceRequest, LlmClient, MonitoringRepository,
};
use crate::services::agent_manager::AgentManager;
use crate::services::guardian::GuardianSummary;

/// Coherence below this escalates to the operator.
const ESCALATION_THRESHOLD: f32 = 0.5;

/// A system-level decision derived from the coherence analysis.
#[derive(Debug, Clone)]
pub enum ConductorDecision {
    TerminateDuplicate {
        agent_id: Uuid,
        reason: String,
    },
    CoordinateResources {
        agents: Vec<Uuid>,
        resource: String,
        action: String,
    },
    Escalate {
        reason: String,
        details: Vec<String>,
    },
}

/// Outcome of one Conductor pass.
#[derive(Debug)]
pub struct ConductorOutcome {
    pub analysis: CoherenceAnalysis,
    pub decisions: Vec<ConductorDecision>,
    pub terminated_agents: Vec<Uuid>,
}

/// Cross-agent LLM-driven coherence monitor.
pub struct Conductor {
    agent_repo: Arc<dyn AgentRepository>,
    monitoring_repo: Arc<dyn MonitoringRepository>,
    agent_manager: Arc<AgentManager>,
    llm: Arc<dyn LlmClient>,
}

impl Conductor {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        monitoring_repo: Arc<dyn MonitoringRepository>,
        agent_manager: Arc<AgentManager>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self { agent_repo, monitoring_repo, agent_manager, llm }
    }

    /// Analyze the fleet and execute the resulting decisions.
    pub async fn run(&self, summaries: &[GuardianSummary]) -> DomainResult<ConductorOutcome> {
        if summaries.is_empty() {
            return Ok(ConductorOutcome {
                analysis: CoherenceAnalysis::empty(),
                decisions: Vec::new(),
                terminated_agents: Vec::new(),
            });
        }

        tracing::info!(agents = summaries.len(), "Conductor analyzing system");

        let request = CoherenceRequest {
            guardian_summaries: summaries.iter().map(GuardianSummary::to_value).collect(),
            system_goals: json!({
                "primary": "Complete all assigned tasks efficiently",
                "constraints": "No duplicate work, efficient resource usage",
                "coordination": "All agents working toward collective objectives",
            }),
        };

        let analysis = match self.llm.analyze_system_coherence(request).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::error!(error = %e, "Conductor analysis failed");
                return Ok(ConductorOutcome {
                    analysis: CoherenceAnalysis::empty(),
                    decisions: Vec::new(),
                    terminated_agents: Vec::new(),
                });
            }
        };

        let decisions = self.derive_decisions(&analysis);
        let analysis_id = self.persist(&analysis, summaries.len(), &decisions).await?;
        let terminated = self.execute(&decisions).await;

        tracing::info!(
            coherence = analysis.coherence_score,
            duplicates = analysis.duplicates.len(),
            decisions = decisions.len(),
            analysis_id,
            "Conductor pass complete"
        );

        Ok(ConductorOutcome { analysis, decisions, terminated_agents: terminated })
    }

    fn derive_decisions(&self, analysis: &CoherenceAnalysis) -> Vec<ConductorDecision> {
        let mut decisions = Vec::new();

        for rec in &analysis.termination_recommendations {
            match Uuid::parse_str(&rec.agent_id) {
                Ok(agent_id) => decisions.push(ConductorDecision::TerminateDuplicate {
                    agent_id,
                    reason: if rec.reason.is_empty() {
                        "Duplicate work detected".to_string()
                    } else {
                        rec.reason.clone()
                    },
                }),
                Err(_) => {
                    tracing::warn!(agent_id = %rec.agent_id, "Unparseable termination target")
                }
            }
        }

        for need in &analysis.coordination_needs {
            let agents: Vec<Uuid> = need
                .agents
                .iter()
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect();
            if !agents.is_empty() {
                decisions.push(ConductorDecision::CoordinateResources {
                    agents,
                    resource: need.resource.clone(),
                    action: need.action.clone(),
                });
            }
        }

        if analysis.coherence_score < ESCALATION_THRESHOLD {
            decisions.push(ConductorDecision::Escalate {
                reason: "System coherence too low".to_string(),
                details: analysis.alignment_issues.clone(),
            });
        }

        decisions
    }

    async fn persist(
        &self,
        analysis: &CoherenceAnalysis,
        num_agents: usize,
        decisions: &[ConductorDecision],
    ) -> DomainResult<i64> {
        let termination_count = decisions
            .iter()
            .filter(|d| matches!(d, ConductorDecision::TerminateDuplicate { .. }))
            .count() as i64;
        let coordination_count = decisions
            .iter()
            .filter(|d| matches!(d, ConductorDecision::CoordinateResources { .. }))
            .count() as i64;

        let record = ConductorAnalysisRecord {
            id: None,
            created_at: Utc::now(),
            coherence_score: analysis.coherence_score,
            num_agents: num_agents as i64,
            system_status: analysis.system_summary.clone(),
            duplicate_count: analysis.duplicates.len() as i64,
            termination_count,
            coordination_count,
            details: Some(serde_json::to_value(analysis)?),
        };
        let analysis_id = self.monitoring_repo.save_conductor_analysis(&record).await?;

        for dup in &analysis.duplicates {
            self.monitoring_repo
                .save_detected_duplicate(&DetectedDuplicateRecord {
                    id: None,
                    conductor_analysis_id: Some(analysis_id),
                    agent1_id: Uuid::parse_str(&dup.agent1).ok(),
                    agent2_id: Uuid::parse_str(&dup.agent2).ok(),
                    similarity_score: dup.similarity,
                    work_description: dup.work.clone(),
                    created_at: Utc::now(),
                })
                .await?;
        }

        self.agent_repo
            .append_log(
                &AgentLog::system(
                    LogKind::ConductorAnalysis,
                    format!(
                        "Conductor: coherence={:.2}, {} duplicates",
                        analysis.coherence_score,
                        analysis.duplicates.len()
                    ),
                )
                .with_details(json!({"conductor_analysis_id": analysis_id})),
            )
            .await?;

        Ok(analysis_id)
    }

    /// Execute decisions, returning the agents actually terminated.
    async fn execute(&self, decisions: &[ConductorDecision]) -> Vec<Uuid> {
        let mut terminated = Vec::new();
        for decision in decisions {
            if let Err(e) = self.execute_one(decision, &mut terminated).await {
                tracing::error!(error = %e, "Failed to execute conductor decision");
            }
        }
        terminated
    }

    async fn execute_one(
        &self,
        decision: &ConductorDecision,
        terminated: &mut Vec<Uuid>,
    ) -> DomainResult<()> {
        match decision {
            ConductorDecision::TerminateDuplicate { agent_id, reason } => {
                let Some(agent) = self.agent_repo.get(*agent_id).await? else {
                    tracing::warn!(%agent_id, "Termination target not found");
                    return Ok(());
                };

                if agent.agent_type.is_protected_from_duplicate_termination() {
                    tracing::warn!(
                        %agent_id,
                        agent_type = agent.agent_type.as_str(),
                        "SAFETY: skipping termination of validation agent"
                    );
                    return Ok(());
                }

                tracing::info!(%agent_id, reason, "Terminating duplicate agent");
                self.agent_repo
                    .append_log(&AgentLog::new(
                        *agent_id,
                        LogKind::Termination,
                        format!("Terminated by Conductor: {reason}"),
                    ))
                    .await?;
                self.agent_manager.terminate(*agent_id).await?;
                terminated.push(*agent_id);
            }
            ConductorDecision::CoordinateResources { agents, resource, action } => {
                for (i, agent_id) in agents.iter().enumerate() {
                    let mut message =
                        format!("[CONDUCTOR]: Resource coordination for {resource}. ");
                    if i == 0 {
                        message.push_str("You have priority access.");
                    } else {
                        message.push_str(&format!(
                            "Please wait for agent {} to complete.",
                            agents[0]
                        ));
                    }
                    if !action.is_empty() {
                        message.push_str(&format!(" ({action})"));
                    }
                    self.agent_manager.send(*agent_id, &message).await?;
                }
            }
            ConductorDecision::Escalate { reason, details } => {
                tracing::error!(reason, ?details, "CONDUCTOR ESCALATION");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::MockLlmClient;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteMonitoringRepository,
        SqliteTaskRepository, SqliteWorktreeRepository,
    };
    use crate::adapters::tmux::InMemorySessionHost;
    use crate::domain::models::config::AgentConfig;
    use crate::domain::models::{Agent, AgentStatus, AgentType, Task};
    use crate::domain::ports::{
        CoordinationNeed, DuplicateWork, SessionHost, TaskRepository, TerminationRecommendation,
        TrajectoryAnalysis,
    };
    use crate::services::worktree_manager::WorktreeManager;

    struct Fixture {
        conductor: Conductor,
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

        let conductor = Conductor::new(agents.clone(), monitoring.clone(), agent_manager, llm.clone());
        Fixture { conductor, llm, host, agents, tasks, monitoring, _tmp: tmp }
    }

    async fn live_agent(fx: &Fixture, agent_type: AgentType) -> Agent {
        let task = Task::new("t", "d");
        fx.tasks.create(&task).await.unwrap();
        let mut agent = Agent::new("p", "claude", agent_type, task.id);
        agent.session_name = Some(Agent::session_name_for("agent-", agent.id));
        fx.agents.create(&agent).await.unwrap();
        fx.host
            .create(agent.session_name.as_deref().unwrap(), "/tmp", "claude")
            .await
            .unwrap();
        agent
    }

    fn summary_for(agent: &Agent) -> GuardianSummary {
        GuardianSummary {
            agent_id: agent.id,
            agent_type: agent.agent_type,
            analysis: TrajectoryAnalysis::default_healthy(),
            accumulated_goal: "implement jwt auth".to_string(),
        }
    }

    fn coherence_with_termination(target: Uuid) -> CoherenceAnalysis {
        CoherenceAnalysis {
            coherence_score: 0.8,
            duplicates: vec![DuplicateWork {
                agent1: "a1".to_string(),
                agent2: target.to_string(),
                similarity: 0.95,
                work: "jwt auth".to_string(),
            }],
            alignment_issues: vec![],
            termination_recommendations: vec![TerminationRecommendation {
                agent_id: target.to_string(),
                reason: "duplicate of A1".to_string(),
            }],
            coordination_needs: vec![],
            system_summary: "duplicate pair found".to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_summaries_short_circuit() {
        let fx = setup().await;
        let outcome = fx.conductor.run(&[]).await.unwrap();
        assert!(outcome.decisions.is_empty());
        assert_eq!(outcome.analysis.system_summary, "No agents active");
    }

    #[tokio::test]
    async fn test_terminates_duplicate_agent() {
        let fx = setup().await;
        let a1 = live_agent(&fx, AgentType::Phase).await;
        let a2 = live_agent(&fx, AgentType::Phase).await;

        fx.llm.push_coherence(coherence_with_termination(a2.id));
        let outcome = fx
            .conductor
            .run(&[summary_for(&a1), summary_for(&a2)])
            .await
            .unwrap();

        assert_eq!(outcome.terminated_agents, vec![a2.id]);
        let stored = fx.agents.get(a2.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Terminated);
        // A1 keeps running.
        let a1_stored = fx.agents.get(a1.id).await.unwrap().unwrap();
        assert_eq!(a1_stored.status, AgentStatus::Working);
    }

    #[tokio::test]
    async fn test_validator_protected_from_termination() {
        let fx = setup().await;
        let a1 = live_agent(&fx, AgentType::Phase).await;
        let validator = live_agent(&fx, AgentType::Validator).await;

        fx.llm.push_coherence(coherence_with_termination(validator.id));
        let outcome = fx
            .conductor
            .run(&[summary_for(&a1), summary_for(&validator)])
            .await
            .unwrap();

        assert!(outcome.terminated_agents.is_empty());
        let stored = fx.agents.get(validator.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Working);
    }

    #[tokio::test]
    async fn test_coordination_messages_ordered() {
        let fx = setup().await;
        let a1 = live_agent(&fx, AgentType::Phase).await;
        let a2 = live_agent(&fx, AgentType::Phase).await;

        fx.llm.push_coherence(CoherenceAnalysis {
            coordination_needs: vec![CoordinationNeed {
                agents: vec![a1.id.to_string(), a2.id.to_string()],
                resource: "schema.sql".to_string(),
                action: "serialize writes".to_string(),
            }],
            ..CoherenceAnalysis::empty()
        });

        fx.conductor
            .run(&[summary_for(&a1), summary_for(&a2)])
            .await
            .unwrap();

        let first = fx.host.sent_messages(a1.session_name.as_deref().unwrap()).await;
        assert!(first[0].contains("priority access"));
        let second = fx.host.sent_messages(a2.session_name.as_deref().unwrap()).await;
        assert!(second[0].contains("Please wait for agent"));
    }

    #[tokio::test]
    async fn test_low_coherence_escalates_and_persists() {
        let fx = setup().await;
        let a1 = live_agent(&fx, AgentType::Phase).await;

        fx.llm.push_coherence(CoherenceAnalysis {
            coherence_score: 0.3,
            alignment_issues: vec!["agents diverging".to_string()],
            system_summary: "incoherent".to_string(),
            ..CoherenceAnalysis::empty()
        });

        let outcome = fx.conductor.run(&[summary_for(&a1)]).await.unwrap();
        assert!(outcome
            .decisions
            .iter()
            .any(|d| matches!(d, ConductorDecision::Escalate { .. })));

        let recent = fx.monitoring.recent_conductor_analyses(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!((recent[0].coherence_score - 0.3).abs() < 1e-6);
    }
}
