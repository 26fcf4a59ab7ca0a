//! The monitoring loop.
//!
//! Ticks at a fixed period and drives, in order: per-agent Guardian analyses
//! (fanned out concurrently), one Conductor pass over the summaries, orphan
//! session GC, workflow phase progression, and the stuck-workflow
//! diagnostic. Each tick produces a typed report so partial failure is
//! explicit.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::Config;
use crate::domain::models::{
    Agent, AgentLog, AgentType, DiagnosticRun, DiagnosticStatus, LogKind, Phase, PhaseStatus,
    Task, TaskPriority, TaskStatus, MONITOR_AGENT,
};
use crate::domain::ports::{
    AgentRepository, MonitoringRepository, TaskRepository, WorkflowRepository,
};
use crate::services::agent_manager::{AgentManager, SpawnRequest};
use crate::services::conductor::Conductor;
use crate::services::guardian::{Guardian, GuardianSummary};
use crate::services::task_service::TaskService;

/// Outcome of one monitoring tick, per sub-step.
#[derive(Debug, Default)]
pub struct TickReport {
    pub active_agents: usize,
    pub analyzed: usize,
    pub steered: usize,
    pub restarted: Vec<Uuid>,
    pub timed_out: Vec<Uuid>,
    pub conductor_coherence: Option<f32>,
    pub conductor_terminated: Vec<Uuid>,
    pub orphans_killed: usize,
    pub phases_advanced: usize,
    pub diagnostics_triggered: usize,
}

/// Single-threaded driver for the monitoring subsystems.
pub struct MonitorLoop {
    agent_repo: Arc<dyn AgentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    monitoring_repo: Arc<dyn MonitoringRepository>,
    agent_manager: Arc<AgentManager>,
    guardian: Arc<Guardian>,
    conductor: Arc<Conductor>,
    task_service: Arc<TaskService>,
    config: Config,
    last_orphan_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl MonitorLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        task_repo: Arc<dyn TaskRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        monitoring_repo: Arc<dyn MonitoringRepository>,
        agent_manager: Arc<AgentManager>,
        guardian: Arc<Guardian>,
        conductor: Arc<Conductor>,
        task_service: Arc<TaskService>,
        config: Config,
    ) -> Self {
        Self {
            agent_repo,
            task_repo,
            workflow_repo,
            monitoring_repo,
            agent_manager,
            guardian,
            conductor,
            task_service,
            config,
            last_orphan_sweep: Mutex::new(None),
        }
    }

    /// Run until the shutdown signal flips. The in-flight tick is drained
    /// before exit; no new tick starts after the signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period =
            std::time::Duration::from_secs(self.config.monitoring.interval_seconds.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_seconds = self.config.monitoring.interval_seconds,
            "Monitoring loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => tracing::debug!(?report, "Monitor tick complete"),
                        Err(e) => tracing::error!(error = %e, "Error in monitoring cycle"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("Monitoring loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Execute one monitoring cycle.
    pub async fn tick(&self) -> DomainResult<TickReport> {
        let mut report = TickReport::default();

        let agents = self.agent_manager.active_agents().await?;
        report.active_agents = agents.len();
        tracing::debug!(agents = agents.len(), "Trajectory monitoring active agents");

        // Phase 1: Guardian analyses, fan-out / fan-in with per-agent
        // error isolation.
        let analyses = join_all(agents.iter().map(|agent| self.guardian_step(agent))).await;

        let mut summaries: Vec<GuardianSummary> = Vec::new();
        for (agent, outcome) in agents.iter().zip(analyses) {
            match outcome {
                Ok(GuardianStep::Analyzed { summary, steered }) => {
                    report.analyzed += 1;
                    if steered {
                        report.steered += 1;
                    }
                    summaries.push(summary);
                }
                Ok(GuardianStep::Restarted) => report.restarted.push(agent.id),
                Ok(GuardianStep::TimedOut) => report.timed_out.push(agent.id),
                Ok(GuardianStep::Skipped) => {}
                Err(e) => {
                    tracing::error!(agent_id = %agent.id, error = %e, "Guardian analysis failed");
                }
            }
        }

        // Phase 2: Conductor over the tick's summaries.
        if !summaries.is_empty() {
            match self.conductor.run(&summaries).await {
                Ok(outcome) => {
                    report.conductor_coherence = Some(outcome.analysis.coherence_score);
                    report.conductor_terminated = outcome.terminated_agents;
                }
                Err(e) => tracing::error!(error = %e, "Conductor analysis failed"),
            }
        }

        // Phase 3: orphaned session GC (grace-limited).
        match self.cleanup_orphaned_sessions().await {
            Ok(killed) => report.orphans_killed = killed,
            Err(e) => tracing::error!(error = %e, "Error cleaning up orphaned sessions"),
        }

        // Phase 4 + 5: per active workflow, phase progression and the stuck
        // diagnostic.
        let workflows = self.workflow_repo.list_active_workflows().await?;
        for workflow in &workflows {
            match self.check_phase_progression(workflow.id).await {
                Ok(advanced) => report.phases_advanced += advanced,
                Err(e) => {
                    tracing::error!(workflow_id = %workflow.id, error = %e, "Phase progression failed")
                }
            }
            match self.check_workflow_stuck(workflow.id, workflow.goal.as_deref()).await {
                Ok(true) => report.diagnostics_triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(workflow_id = %workflow.id, error = %e, "Stuck-workflow check failed")
                }
            }
        }

        Ok(report)
    }

    /// Guardian sub-step for one agent.
    async fn guardian_step(&self, agent: &Agent) -> DomainResult<GuardianStep> {
        // Grace period for spin-up.
        let age = agent.age_seconds(Utc::now());
        if age < self.config.monitoring.guardian_min_agent_age_seconds as i64 {
            tracing::debug!(agent_id = %agent.id, age, "Skipping Guardian analysis (too young)");
            return Ok(GuardianStep::Skipped);
        }

        // Missing session → restart with the same id and state.
        if !self.agent_manager.session_alive(agent).await? {
            tracing::warn!(agent_id = %agent.id, "Agent session missing; recreating");
            self.agent_manager
                .restart(agent.id, "session was missing, recreating")
                .await?;
            return Ok(GuardianStep::Restarted);
        }

        // Task timeout scaled by complexity → recreate with a new approach.
        if self.task_timed_out(agent).await? {
            self.handle_timeout(agent).await?;
            return Ok(GuardianStep::TimedOut);
        }

        let output = self
            .agent_manager
            .output(agent.id, self.config.monitoring.tmux_output_lines)
            .await?;
        if output.trim().is_empty() {
            tracing::warn!(agent_id = %agent.id, "No output from agent");
            return Ok(GuardianStep::Skipped);
        }

        let summary = self.guardian.analyze_agent(agent, &output).await?;

        let mut steered = false;
        if summary.analysis.needs_steering {
            if let (Some(steering_type), Some(message)) = (
                summary.analysis.steering_type,
                summary.analysis.steering_recommendation.clone(),
            ) {
                steered = self.guardian.steer(agent.id, steering_type, &message).await?;
            }
        }

        Ok(GuardianStep::Analyzed { summary, steered })
    }

    /// Timeout check: base minutes scaled by `1 + complexity / 10`.
    async fn task_timed_out(&self, agent: &Agent) -> DomainResult<bool> {
        let Some(task_id) = agent.current_task_id else {
            return Ok(false);
        };
        let Some(task) = self.task_repo.get(task_id).await? else {
            return Ok(false);
        };
        let Some(started_at) = task.started_at else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            return Ok(false);
        }

        let complexity = task.estimated_complexity.unwrap_or(5);
        let timeout_minutes = self.config.monitoring.agent_timeout_minutes as f64
            * (1.0 + f64::from(complexity) / 10.0);
        let elapsed = (Utc::now() - started_at).num_seconds() as f64 / 60.0;
        Ok(elapsed > timeout_minutes)
    }

    /// Terminate a timed-out agent and requeue its task for a fresh attempt.
    async fn handle_timeout(&self, agent: &Agent) -> DomainResult<()> {
        tracing::warn!(agent_id = %agent.id, "Handling task timeout");

        self.agent_repo
            .append_log(
                &AgentLog::new(
                    agent.id,
                    LogKind::Intervention,
                    "Task timed out, recreating with a fresh approach",
                )
                .with_details(json!({"type": "recreate"})),
            )
            .await?;
        self.agent_manager.terminate(agent.id).await?;

        if let Some(task_id) = agent.current_task_id {
            if let Some(mut task) = self.task_repo.get(task_id).await? {
                task.assigned_agent_id = None;
                task.completion_notes = Some(
                    "Previous attempt timed out; retrying with a fresh agent".to_string(),
                );
                task.force_status(TaskStatus::Queued, "task timeout");
                task.queued_at = Some(Utc::now());
                self.task_repo.update(&task).await?;
                crate::services::queue_service::recalculate_queue_positions(
                    self.task_repo.as_ref(),
                )
                .await?;
            }
        }
        self.task_service.process_queue().await?;
        Ok(())
    }

    /// Kill agent-prefixed sessions that no non-terminated agent owns.
    ///
    /// Runs at most once per grace period
    /// (`max(2 × tick, guardian_min_agent_age)`) so newly spawned agents have
    /// time to register before a sweep can see their session.
    async fn cleanup_orphaned_sessions(&self) -> DomainResult<usize> {
        let grace = Duration::seconds(self.config.monitoring.orphan_grace_seconds() as i64);
        let now = Utc::now();

        let mut last_sweep = self.last_orphan_sweep.lock().await;
        match *last_sweep {
            None => {
                // First sweep only records time; everything gets grace.
                *last_sweep = Some(now);
                return Ok(0);
            }
            Some(previous) if now - previous < grace => {
                return Ok(0);
            }
            Some(_) => {}
        }
        *last_sweep = Some(now);
        drop(last_sweep);

        let orphans = self.agent_manager.orphaned_sessions().await?;
        if orphans.is_empty() {
            return Ok(0);
        }

        tracing::info!(count = orphans.len(), ?orphans, "Killing orphaned sessions");
        let mut killed = 0;
        for session in &orphans {
            match self.agent_manager.kill_session(session).await {
                Ok(()) => killed += 1,
                Err(e) => tracing::warn!(session, error = %e, "Failed to kill orphaned session"),
            }
        }
        Ok(killed)
    }

    /// Advance workflow phases: a pending phase with tasks goes in_progress;
    /// an in_progress phase whose tasks are all finished (with at least one
    /// done) completes and seeds the next phase's initial task.
    async fn check_phase_progression(&self, workflow_id: Uuid) -> DomainResult<usize> {
        let phases = self.workflow_repo.list_phases(workflow_id).await?;
        let tasks = self.task_repo.list_by_workflow(workflow_id).await?;
        let mut advanced = 0;

        for phase in &phases {
            let phase_tasks: Vec<&Task> =
                tasks.iter().filter(|t| t.phase_id == Some(phase.id)).collect();

            match phase.status {
                PhaseStatus::Pending if !phase_tasks.is_empty() => {
                    let mut phase = phase.clone();
                    phase.status = PhaseStatus::InProgress;
                    self.workflow_repo.update_phase(&phase).await?;
                }
                PhaseStatus::InProgress => {
                    if phase_complete(&phase_tasks) {
                        let done = phase_tasks
                            .iter()
                            .filter(|t| t.status == TaskStatus::Done)
                            .count();
                        let mut completed = phase.clone();
                        completed.complete(format!("Phase completed with {done} done tasks"));
                        self.workflow_repo.update_phase(&completed).await?;
                        advanced += 1;
                        tracing::info!(phase = %phase.name, "Phase complete");

                        if let Some(next) = phases.iter().find(|p| p.seq == phase.seq + 1) {
                            self.create_next_phase_task(next).await?;
                        } else {
                            tracing::info!(%workflow_id, "No next phase; workflow may be complete");
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(advanced)
    }

    /// Seed the initial task of a phase (created by the monitor).
    async fn create_next_phase_task(&self, next: &Phase) -> DomainResult<()> {
        let description = format!("Execute {}: {}", next.name, next.description);
        let done_definition = if next.done_definitions.is_empty() {
            "Complete phase objectives".to_string()
        } else {
            next.done_definitions.join(" AND ")
        };

        let mut task = Task::new(description, done_definition)
            .with_priority(TaskPriority::High)
            .with_phase(next.id, next.workflow_id)
            .with_created_by(MONITOR_AGENT);
        task.enriched_description = Some(task.raw_description.clone());
        self.task_repo.create(&task).await?;

        self.agent_repo
            .append_log(
                &AgentLog::system(
                    LogKind::Intervention,
                    format!("Auto-created initial task for phase {}", next.name),
                )
                .with_details(json!({"task_id": task.id, "phase_id": next.id})),
            )
            .await?;

        tracing::info!(phase = %next.name, task_id = %task.id, "Created next-phase task");
        self.task_service.process_new_task(task.id).await?;
        Ok(())
    }

    /// Fire the diagnostic agent when a workflow has tasks, none active, no
    /// validated result, and the cooldown and stuck-time thresholds passed.
    async fn check_workflow_stuck(
        &self,
        workflow_id: Uuid,
        workflow_goal: Option<&str>,
    ) -> DomainResult<bool> {
        if !self.config.diagnostic.enabled {
            return Ok(false);
        }

        let tasks = self.task_repo.list_by_workflow(workflow_id).await?;
        if tasks.is_empty() {
            return Ok(false);
        }

        let active = tasks.iter().filter(|t| !t.status.is_terminal()).count();
        if active > 0 {
            return Ok(false);
        }

        let validated = self
            .workflow_repo
            .list_results(workflow_id, Some("validated"))
            .await?;
        if !validated.is_empty() {
            return Ok(false);
        }

        if let Some(last) = self.monitoring_repo.latest_diagnostic_run(workflow_id).await? {
            let since = (Utc::now() - last.triggered_at).num_seconds();
            if since < self.config.diagnostic.cooldown_seconds as i64 {
                tracing::debug!(%workflow_id, since, "Diagnostic cooldown active");
                return Ok(false);
            }
        }

        let last_activity = tasks
            .iter()
            .filter_map(|t| t.completed_at.or(Some(t.created_at)))
            .max();
        let stuck_seconds = match last_activity {
            Some(at) => (Utc::now() - at).num_seconds(),
            None => 0,
        };
        if stuck_seconds < self.config.diagnostic.min_stuck_time_seconds as i64 {
            return Ok(false);
        }

        tracing::warn!(%workflow_id, stuck_seconds, "Workflow stuck; triggering diagnostic agent");
        self.spawn_diagnostic_agent(workflow_id, workflow_goal, &tasks, stuck_seconds)
            .await?;
        Ok(true)
    }

    async fn spawn_diagnostic_agent(
        &self,
        workflow_id: Uuid,
        workflow_goal: Option<&str>,
        tasks: &[Task],
        stuck_seconds: i64,
    ) -> DomainResult<()> {
        let done = tasks.iter().filter(|t| t.status == TaskStatus::Done).count() as i64;
        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count() as i64;

        let context = self
            .gather_diagnostic_context(workflow_id, workflow_goal, tasks, stuck_seconds)
            .await?;

        // Diagnostic tasks are phase-agnostic and work in the main repo.
        let mut task = Task::new(
            "DIAGNOSTIC: Analyze why the workflow has stalled and create tasks to progress toward the goal",
            "Created 1-5 new tasks with clear phase assignments and completion criteria",
        )
        .with_priority(TaskPriority::High)
        .with_workflow(workflow_id)
        .with_created_by(MONITOR_AGENT);
        task.enriched_description = Some(format!(
            "Diagnostic analysis for workflow {workflow_id}: {} tasks finished, stuck for {stuck_seconds}s",
            tasks.len()
        ));
        self.task_repo.create(&task).await?;

        let mut run = DiagnosticRun::new(workflow_id, tasks.len() as i64, done, failed, stuck_seconds);
        run.diagnostic_task_id = Some(task.id);
        run.workflow_goal = context["workflow_goal"].as_str().map(str::to_string);
        run.phases_analyzed = Some(context["phases_summary"].clone());
        run.agents_reviewed = Some(context["agents_summary"].clone());
        self.monitoring_repo.create_diagnostic_run(&run).await?;

        let prompt = render_diagnostic_prompt(&context);
        let agent = self
            .agent_manager
            .spawn(SpawnRequest {
                task: &task,
                enriched_description: task.description().to_string(),
                memories: vec![],
                project_context: String::new(),
                phase_context: None,
                agent_type: AgentType::Diagnostic,
                use_existing_worktree: true,
                working_dir: Some(self.config.main_repo_path.to_string_lossy().into_owned()),
                parent_agent_id: None,
                prompt_override: Some(prompt),
            })
            .await?;

        task.assigned_agent_id = Some(agent.id);
        task.force_status(TaskStatus::Assigned, "diagnostic agent spawned");
        self.task_repo.update(&task).await?;

        run.diagnostic_agent_id = Some(agent.id);
        run.status = DiagnosticStatus::Running;
        self.monitoring_repo.update_diagnostic_run(&run).await?;

        tracing::info!(
            %workflow_id,
            agent_id = %agent.id,
            task_id = %task.id,
            "Diagnostic agent created"
        );
        Ok(())
    }

    async fn gather_diagnostic_context(
        &self,
        workflow_id: Uuid,
        workflow_goal: Option<&str>,
        tasks: &[Task],
        stuck_seconds: i64,
    ) -> DomainResult<serde_json::Value> {
        let phases = self.workflow_repo.list_phases(workflow_id).await?;
        let phases_summary: Vec<_> = phases
            .iter()
            .map(|phase| {
                let phase_tasks: Vec<&Task> =
                    tasks.iter().filter(|t| t.phase_id == Some(phase.id)).collect();
                json!({
                    "name": phase.name,
                    "seq": phase.seq,
                    "description": phase.description,
                    "done_definitions": phase.done_definitions,
                    "task_count": phase_tasks.len(),
                    "done_task_count": phase_tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Done)
                        .count(),
                    "failed_task_count": phase_tasks
                        .iter()
                        .filter(|t| t.status == TaskStatus::Failed)
                        .count(),
                })
            })
            .collect();

        let task_ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let recent_agents = self
            .agent_repo
            .list_terminated_for_tasks(&task_ids, self.config.diagnostic.max_agents_to_analyze)
            .await?;
        let mut agents_summary = Vec::new();
        for agent in &recent_agents {
            let task = agent.current_task_id.and_then(|id| tasks.iter().find(|t| t.id == id));
            if let Some(task) = task {
                agents_summary.push(json!({
                    "agent_id": agent.id,
                    "agent_type": agent.agent_type.as_str(),
                    "task_description": task.description(),
                    "task_status": task.status.as_str(),
                    "completion_notes": task.completion_notes,
                    "failure_reason": task.failure_reason,
                }));
            }
        }

        let conductor_overviews: Vec<_> = self
            .monitoring_repo
            .recent_conductor_analyses(self.config.diagnostic.max_conductor_analyses)
            .await?
            .into_iter()
            .map(|a| {
                json!({
                    "timestamp": a.created_at.to_rfc3339(),
                    "system_status": a.system_status,
                    "coherence_score": a.coherence_score,
                    "num_agents": a.num_agents,
                    "duplicate_count": a.duplicate_count,
                })
            })
            .collect();

        let submitted_results: Vec<_> = self
            .workflow_repo
            .list_results(workflow_id, None)
            .await?
            .into_iter()
            .map(|r| {
                json!({
                    "result_id": r.id,
                    "status": r.status.as_str(),
                    "submitted_at": r.created_at.to_rfc3339(),
                    "validation_feedback": r.validation_feedback,
                })
            })
            .collect();

        Ok(json!({
            "workflow_id": workflow_id,
            "workflow_goal": workflow_goal.unwrap_or("Unknown goal"),
            "phases_summary": phases_summary,
            "agents_summary": agents_summary,
            "conductor_overviews": conductor_overviews,
            "submitted_results": submitted_results,
            "total_tasks": tasks.len(),
            "time_since_last_task_seconds": stuck_seconds,
        }))
    }
}

/// Outcome of the per-agent Guardian sub-step.
enum GuardianStep {
    Analyzed { summary: GuardianSummary, steered: bool },
    Restarted,
    TimedOut,
    Skipped,
}

/// A phase is complete when it has tasks, none are active, and at least one
/// finished done.
fn phase_complete(tasks: &[&Task]) -> bool {
    !tasks.is_empty()
        && tasks.iter().all(|t| t.status.is_terminal())
        && tasks.iter().any(|t| t.status == TaskStatus::Done)
}

fn humanize_duration(seconds: i64) -> String {
    if seconds >= 3600 {
        format!("{:.1} hours", seconds as f64 / 3600.0)
    } else if seconds >= 60 {
        format!("{:.1} minutes", seconds as f64 / 60.0)
    } else {
        format!("{seconds} seconds")
    }
}

/// Render the diagnostic agent's prompt from the gathered context.
fn render_diagnostic_prompt(context: &serde_json::Value) -> String {
    let mut prompt = format!(
        "You are a diagnostic agent. The workflow below has no active tasks, no validated \
         result, and no progress for {}.\n\n\
         ## Workflow goal\n{}\n\n## Phase progress\n",
        humanize_duration(context["time_since_last_task_seconds"].as_i64().unwrap_or(0)),
        context["workflow_goal"].as_str().unwrap_or("Unknown goal"),
    );

    for phase in context["phases_summary"].as_array().into_iter().flatten() {
        prompt.push_str(&format!(
            "- Phase {} ({}): {}/{} tasks done, {} failed\n",
            phase["seq"],
            phase["name"].as_str().unwrap_or("?"),
            phase["done_task_count"],
            phase["task_count"],
            phase["failed_task_count"],
        ));
    }

    let agents = context["agents_summary"].as_array().cloned().unwrap_or_default();
    if agents.is_empty() {
        prompt.push_str("\n## Recent agents\nNo agents have run yet.\n");
    } else {
        prompt.push_str("\n## Recent agents\n");
        for agent in &agents {
            prompt.push_str(&format!(
                "- [{}] {}: {}{}\n",
                agent["task_status"].as_str().unwrap_or("?"),
                agent["agent_type"].as_str().unwrap_or("?"),
                agent["task_description"].as_str().unwrap_or(""),
                agent["failure_reason"]
                    .as_str()
                    .map(|r| format!(" (failed: {r})"))
                    .unwrap_or_default(),
            ));
        }
    }

    let overviews = context["conductor_overviews"].as_array().cloned().unwrap_or_default();
    if !overviews.is_empty() {
        prompt.push_str("\n## Recent system analyses\n");
        for overview in &overviews {
            prompt.push_str(&format!(
                "- {} coherence={} agents={}: {}\n",
                overview["timestamp"].as_str().unwrap_or(""),
                overview["coherence_score"],
                overview["num_agents"],
                overview["system_status"].as_str().unwrap_or(""),
            ));
        }
    }

    let results = context["submitted_results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        prompt.push_str("\n## Submitted results\nNo results have been submitted yet.\n");
    } else {
        prompt.push_str("\n## Submitted results\n");
        for result in &results {
            prompt.push_str(&format!(
                "- {} ({}): feedback {}\n",
                result["result_id"].as_str().unwrap_or("?"),
                result["status"].as_str().unwrap_or("?"),
                result["validation_feedback"].as_str().unwrap_or("none"),
            ));
        }
    }

    prompt.push_str(
        "\n## Your job\nDiagnose why the workflow stalled and create 1 to 5 new tasks that push \
         it toward its goal. Each task needs a clear description, a concrete definition of done, \
         and a phase assignment where applicable. Do not implement anything yourself.\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_complete_requires_a_done_task() {
        let mut done = Task::new("a", "d");
        done.force_status(TaskStatus::Done, "test");
        let mut failed = Task::new("b", "d");
        failed.force_status(TaskStatus::Failed, "test");
        let active = Task::new("c", "d");

        assert!(phase_complete(&[&done, &failed]));
        assert!(!phase_complete(&[&failed]));
        assert!(!phase_complete(&[&done, &active]));
        assert!(!phase_complete(&[]));
    }

    #[test]
    fn test_humanize_duration() {
        assert_eq!(humanize_duration(45), "45 seconds");
        assert_eq!(humanize_duration(90), "1.5 minutes");
        assert_eq!(humanize_duration(5400), "1.5 hours");
    }

    #[test]
    fn test_diagnostic_prompt_sections() {
        let context = json!({
            "workflow_goal": "ship the auth feature",
            "time_since_last_task_seconds": 120,
            "phases_summary": [
                {"seq": 1, "name": "Research", "done_task_count": 2, "task_count": 2, "failed_task_count": 0}
            ],
            "agents_summary": [],
            "conductor_overviews": [],
            "submitted_results": [],
            "total_tasks": 2,
        });
        let prompt = render_diagnostic_prompt(&context);
        assert!(prompt.contains("ship the auth feature"));
        assert!(prompt.contains("2.0 minutes"));
        assert!(prompt.contains("No agents have run yet"));
        assert!(prompt.contains("No results have been submitted yet"));
        assert!(prompt.contains("create 1 to 5 new tasks"));
    }
}
