//! Task lifecycle orchestration.
//!
//! Creation runs a pipeline: persist pending → ticket-blocking gate →
//! enrichment (exactly once) → phase-scoped deduplication → admission
//! (spawn now or enqueue). Completion merges worktrees, links ticket
//! commits, and frees queue slots. A queue processor guarantees forward
//! progress when no external event fires.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::Config;
use crate::domain::models::{
    Agent, AgentType, Phase, Task, TaskPriority, TaskStatus, MONITOR_AGENT,
};
use crate::domain::ports::{
    AgentRepository, EnrichTaskRequest, LlmClient, TaskRepository, TicketRepository, VectorIndex,
    WorkflowRepository,
};
use crate::services::agent_manager::{AgentManager, SpawnRequest};
use crate::services::blocking_service::TaskBlockingService;
use crate::services::embedding_service::EmbeddingService;
use crate::services::queue_service::{Admission, QueueService};
use crate::services::similarity_service::TaskSimilarityService;
use crate::services::ticket_service::TicketService;
use crate::services::validation_service::ValidationService;
use crate::services::worktree_manager::WorktreeManager;

/// Memories retrieved per spawned agent.
const MEMORY_RETRIEVAL_LIMIT: usize = 5;

/// Parameters for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub description: String,
    pub done_definition: String,
    pub priority: TaskPriority,
    pub ticket_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub validation_enabled: Option<bool>,
}

/// Where the creation pipeline left a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Spawned,
    Queued,
    Blocked,
    Duplicated,
    Failed,
}

/// Orchestrates the task lifecycle end to end.
pub struct TaskService {
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    ticket_repo: Arc<dyn TicketRepository>,
    queue: Arc<QueueService>,
    blocking: Arc<TaskBlockingService>,
    similarity: Arc<TaskSimilarityService>,
    embeddings: Arc<EmbeddingService>,
    agent_manager: Arc<AgentManager>,
    worktree_manager: Arc<WorktreeManager>,
    validation: Arc<ValidationService>,
    ticket_service: Arc<TicketService>,
    llm: Arc<dyn LlmClient>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    config: Config,
}

impl TaskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        ticket_repo: Arc<dyn TicketRepository>,
        queue: Arc<QueueService>,
        blocking: Arc<TaskBlockingService>,
        similarity: Arc<TaskSimilarityService>,
        embeddings: Arc<EmbeddingService>,
        agent_manager: Arc<AgentManager>,
        worktree_manager: Arc<WorktreeManager>,
        validation: Arc<ValidationService>,
        ticket_service: Arc<TicketService>,
        llm: Arc<dyn LlmClient>,
        vector_index: Option<Arc<dyn VectorIndex>>,
        config: Config,
    ) -> Self {
        Self {
            task_repo,
            agent_repo,
            workflow_repo,
            ticket_repo,
            queue,
            blocking,
            similarity,
            embeddings,
            agent_manager,
            worktree_manager,
            validation,
            ticket_service,
            llm,
            vector_index,
            config,
        }
    }

    /// Persist a new pending task. The caller then runs (or defers) the
    /// processing pipeline via [`process_new_task`](Self::process_new_task).
    pub async fn create_task(&self, new: NewTask) -> DomainResult<Task> {
        self.enforce_ticket_policy(&new).await?;

        let mut task = Task::new(new.description, new.done_definition)
            .with_priority(new.priority);
        task.ticket_id = new.ticket_id;
        task.parent_task_id = new.parent_task_id;
        task.created_by_agent_id = new.created_by;
        if let Some(validation) = new.validation_enabled {
            task.validation_enabled = validation;
        }

        if let Some(phase_id) = new.phase_id {
            let phase = self
                .workflow_repo
                .get_phase(phase_id)
                .await?
                .ok_or_else(|| {
                    DomainError::InvalidArgument(format!("Phase not found: {phase_id}"))
                })?;
            task.phase_id = Some(phase.id);
            task.workflow_id = Some(phase.workflow_id);
        }

        self.task_repo.create(&task).await?;
        tracing::info!(task_id = %task.id, "Task created");
        Ok(task)
    }

    /// Create a task and run the full pipeline inline.
    pub async fn create_and_process(&self, new: NewTask) -> DomainResult<(Task, PipelineOutcome)> {
        let task = self.create_task(new).await?;
        let outcome = self.process_new_task(task.id).await?;
        let task = self
            .task_repo
            .get(task.id)
            .await?
            .ok_or(DomainError::TaskNotFound(task.id))?;
        Ok((task, outcome))
    }

    /// Run the processing pipeline for a freshly created task.
    ///
    /// Idempotent with respect to enrichment: a task that already carries an
    /// enriched description is not enriched again.
    pub async fn process_new_task(&self, task_id: Uuid) -> DomainResult<PipelineOutcome> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        // Blocked tickets stop the pipeline before any LLM spend.
        if task.ticket_id.is_some() {
            let blocking = self.blocking.check(task_id).await?;
            if blocking.is_blocked {
                let reason = format!("Blocked by tickets: {}", blocking.blocker_titles.join(", "));
                self.blocking.block(task_id, Some(reason)).await?;
                return Ok(PipelineOutcome::Blocked);
            }
        }

        let phase = match task.phase_id {
            Some(phase_id) => self.workflow_repo.get_phase(phase_id).await?,
            None => None,
        };
        let phase_context = match &phase {
            Some(phase) => Some(self.render_phase_context(phase).await?),
            None => None,
        };

        // Enrichment happens exactly once per task.
        if !task.is_enriched() {
            let memories = self.retrieve_memories(&task.raw_description).await;
            let request = EnrichTaskRequest {
                task_description: task.raw_description.clone(),
                done_definition: task.done_definition.clone(),
                context: memories,
                phase_context: phase_context.clone(),
            };
            match self.llm.enrich_task(request).await {
                Ok(enriched) => {
                    task.enriched_description = Some(enriched.enriched_description);
                    task.estimated_complexity = Some(enriched.estimated_complexity);
                }
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Task enrichment failed");
                    task.failure_reason = Some(format!("Enrichment failed: {e}"));
                    task.force_status(TaskStatus::Failed, "enrichment failed");
                    self.task_repo.update(&task).await?;
                    return Ok(PipelineOutcome::Failed);
                }
            }
        }

        // Tasks in validating phases inherit validation.
        if let Some(phase) = &phase {
            if phase.validation_enabled() {
                task.validation_enabled = true;
            }
        }
        task.updated_at = Utc::now();
        self.task_repo.update(&task).await?;

        // Phase-scoped deduplication; failures degrade to "not a duplicate".
        // Like enrichment it runs exactly once: a task that already carries
        // an embedding (e.g. a restart) is not re-checked against itself.
        if self.config.dedup.enabled && task.embedding.is_none() {
            match self.embeddings.generate(task.description()).await {
                Ok(embedding) => {
                    let check = self
                        .similarity
                        .check_for_duplicates(&embedding, task.phase_id)
                        .await?;
                    if check.is_duplicate {
                        self.similarity
                            .store_task_embedding(
                                task.id,
                                embedding,
                                vec![],
                                check.duplicate_of,
                                Some(check.max_similarity),
                            )
                            .await?;
                        let mut task = self
                            .task_repo
                            .get(task_id)
                            .await?
                            .ok_or(DomainError::TaskNotFound(task_id))?;
                        task.force_status(TaskStatus::Duplicated, "duplicate detected");
                        self.task_repo.update(&task).await?;
                        tracing::warn!(
                            %task_id,
                            duplicate_of = ?check.duplicate_of,
                            similarity = check.max_similarity,
                            "Task is a duplicate; no agent spawned"
                        );
                        return Ok(PipelineOutcome::Duplicated);
                    }
                    self.similarity
                        .store_task_embedding(task.id, embedding, check.related_tasks, None, None)
                        .await?;
                }
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Embedding failed; skipping dedup");
                }
            }
        }

        // Admission: spawn now or queue.
        match self.queue.admit().await? {
            Admission::Enqueue => {
                self.queue.enqueue(task_id).await?;
                Ok(PipelineOutcome::Queued)
            }
            Admission::RunNow => {
                let task = self
                    .task_repo
                    .get(task_id)
                    .await?
                    .ok_or(DomainError::TaskNotFound(task_id))?;
                match self.spawn_for_task(&task).await {
                    Ok(_) => Ok(PipelineOutcome::Spawned),
                    Err(e) => {
                        self.fail_task(task_id, &format!("Agent spawn failed: {e}")).await?;
                        Ok(PipelineOutcome::Failed)
                    }
                }
            }
        }
    }

    /// Agent status report: done or failed, with validation gating.
    pub async fn update_task_status(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        done: bool,
        summary: Option<String>,
        failure_reason: Option<String>,
    ) -> DomainResult<Task> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if task.assigned_agent_id != Some(agent_id) {
            return Err(DomainError::NotTaskOwner { agent_id, task_id });
        }

        if done && !task.has_results {
            tracing::warn!(%task_id, "Task completed without formal results reported");
        }

        if done && task.validation_enabled {
            match self
                .validation
                .begin_task_validation(task_id, agent_id, summary)
                .await
            {
                Ok(_validator) => {}
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Validator spawn failed");
                    self.fail_task(task_id, &format!("Validation spawning failed: {e}"))
                        .await?;
                    self.agent_manager.terminate(agent_id).await?;
                    self.process_queue().await?;
                }
            }
            return self
                .task_repo
                .get(task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(task_id));
        }

        // Direct path: no validation (or a failure report).
        if done {
            task.force_status(TaskStatus::Done, "agent reported done");
            task.completion_notes = summary;

            match self.worktree_manager.merge_to_parent(agent_id).await {
                Ok(merge_sha) => {
                    if let Some(ticket_id) = task.ticket_id {
                        if let Err(e) = self
                            .ticket_service
                            .link_commit(
                                ticket_id,
                                &agent_id.to_string(),
                                &merge_sha,
                                &format!("Task {task_id} completed and merged"),
                                "auto_task_completion",
                            )
                            .await
                        {
                            tracing::error!(%ticket_id, error = %e, "Failed to auto-link commit");
                        }
                    }
                }
                Err(DomainError::WorktreeNotFound(_)) => {} // diagnostic agents have none
                Err(e) => tracing::warn!(%task_id, error = %e, "Merge to parent failed"),
            }
        } else {
            task.force_status(TaskStatus::Failed, "agent reported failure");
            task.completion_notes = summary;
            task.failure_reason = failure_reason;
        }
        self.task_repo.update(&task).await?;

        self.agent_manager.terminate(agent_id).await?;
        self.process_queue().await?;
        Ok(task)
    }

    /// Record a validator verdict and keep the queue moving.
    pub async fn record_validation_verdict(
        &self,
        task_id: Uuid,
        validator_agent_id: Uuid,
        passed: bool,
        feedback: String,
    ) -> DomainResult<TaskStatus> {
        let outcome = self
            .validation
            .record_task_verdict(task_id, validator_agent_id, passed, feedback)
            .await?;
        if outcome.original_terminated {
            self.process_queue().await?;
        }
        Ok(outcome.task_status)
    }

    /// Boost a queued task and start it immediately, bypassing the agent cap.
    ///
    /// The system tolerates a transient `active > max` until agents complete
    /// naturally.
    pub async fn bump_priority(&self, task_id: Uuid) -> DomainResult<Agent> {
        let task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Queued {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: "assigned".to_string(),
                reason: "only queued tasks can be bumped".to_string(),
            });
        }

        self.queue.boost(task_id).await?;
        self.queue.dequeue(task_id).await?;

        let task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        let agent = self.spawn_for_task(&task).await?;
        tracing::info!(%task_id, agent_id = %agent.id, "Task bumped past the agent limit");
        Ok(agent)
    }

    /// Cancel a queued task: mark failed and re-rank the queue.
    pub async fn cancel_queued(&self, task_id: Uuid) -> DomainResult<()> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        if task.status != TaskStatus::Queued {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: "failed".to_string(),
                reason: "only queued tasks can be cancelled".to_string(),
            });
        }

        task.force_status(TaskStatus::Failed, "cancelled from queue");
        task.failure_reason = Some("Cancelled by user from queue".to_string());
        self.task_repo.update(&task).await?;

        crate::services::queue_service::recalculate_queue_positions(self.task_repo.as_ref())
            .await?;
        tracing::info!(%task_id, "Queued task cancelled");
        Ok(())
    }

    /// Restart a done/failed task: clear completion data and re-enter the
    /// pipeline (enrichment is skipped when already present).
    pub async fn restart(&self, task_id: Uuid) -> DomainResult<PipelineOutcome> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        if !matches!(task.status, TaskStatus::Done | TaskStatus::Failed) {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: "pending".to_string(),
                reason: "only done or failed tasks can be restarted".to_string(),
            });
        }

        task.force_status(TaskStatus::Pending, "restart requested");
        task.assigned_agent_id = None;
        task.started_at = None;
        task.completed_at = None;
        task.completion_notes = None;
        task.failure_reason = None;
        task.validation_iteration = 0;
        task.last_validation_feedback = None;
        self.task_repo.update(&task).await?;

        tracing::info!(%task_id, "Task restarted");
        self.process_new_task(task_id).await
    }

    /// Drain the queue into free agent slots.
    pub async fn process_queue(&self) -> DomainResult<usize> {
        let mut started = 0;
        loop {
            if self.queue.admit().await? != Admission::RunNow {
                break;
            }
            let Some(next) = self.queue.next().await? else {
                break;
            };
            self.queue.dequeue(next.id).await?;
            let task = self
                .task_repo
                .get(next.id)
                .await?
                .ok_or(DomainError::TaskNotFound(next.id))?;
            match self.spawn_for_task(&task).await {
                Ok(_) => started += 1,
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "Spawn from queue failed");
                    self.fail_task(task.id, &format!("Agent spawn failed: {e}")).await?;
                }
            }
        }
        if started > 0 {
            tracing::info!(started, "Queue processed");
        }
        Ok(started)
    }

    /// Spawn an agent for a task and bind them together.
    pub async fn spawn_for_task(&self, task: &Task) -> DomainResult<Agent> {
        let phase = match task.phase_id {
            Some(phase_id) => self.workflow_repo.get_phase(phase_id).await?,
            None => None,
        };
        let phase_context = match &phase {
            Some(phase) => Some(self.render_phase_context(phase).await?),
            None => None,
        };
        let memories = self.retrieve_memories(task.description()).await;

        // A phase may pin agents to a shared directory; the default is an
        // isolated worktree.
        let phase_dir = phase.as_ref().and_then(|p| p.working_directory.clone());
        let (use_existing, working_dir) = match phase_dir {
            Some(dir) => (true, Some(dir)),
            None => (false, None),
        };

        let agent = self
            .agent_manager
            .spawn(SpawnRequest {
                task,
                enriched_description: task.description().to_string(),
                memories,
                project_context: String::new(),
                phase_context,
                agent_type: AgentType::Phase,
                use_existing_worktree: use_existing,
                working_dir,
                parent_agent_id: None,
                prompt_override: None,
            })
            .await?;

        let mut task = self
            .task_repo
            .get(task.id)
            .await?
            .ok_or(DomainError::TaskNotFound(task.id))?;
        task.assigned_agent_id = Some(agent.id);
        task.force_status(TaskStatus::Assigned, "agent spawned");
        self.task_repo.update(&task).await?;
        Ok(agent)
    }

    /// Mark an assigned task as actively in progress.
    pub async fn mark_in_progress(&self, task_id: Uuid, agent_id: Uuid) -> DomainResult<()> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;
        if task.assigned_agent_id != Some(agent_id) {
            return Err(DomainError::NotTaskOwner { agent_id, task_id });
        }
        if task.status == TaskStatus::Assigned {
            task.force_status(TaskStatus::InProgress, "agent reported progress");
            self.task_repo.update(&task).await?;
        }
        Ok(())
    }

    async fn fail_task(&self, task_id: Uuid, reason: &str) -> DomainResult<()> {
        if let Some(mut task) = self.task_repo.get(task_id).await? {
            task.failure_reason = Some(reason.to_string());
            task.force_status(TaskStatus::Failed, reason);
            self.task_repo.update(&task).await?;
        }
        Ok(())
    }

    /// When ticket tracking is active, agent-created tasks must reference a
    /// ticket. System callers (monitor, main/SDK sessions) are exempt.
    async fn enforce_ticket_policy(&self, new: &NewTask) -> DomainResult<()> {
        if new.ticket_id.is_some() {
            return Ok(());
        }
        if !self.ticket_repo.any_board_config().await? {
            return Ok(());
        }
        let exempt = new.created_by.as_deref().is_none_or(|creator| {
            let creator = creator.to_lowercase();
            creator == MONITOR_AGENT || creator.contains("main") || creator.contains("sdk")
        });
        if exempt {
            return Ok(());
        }
        Err(DomainError::InvalidArgument(
            "Ticket tracking is enabled: agents must provide ticket_id. \
             Create a ticket first, then pass its id here."
                .to_string(),
        ))
    }

    async fn render_phase_context(&self, phase: &Phase) -> DomainResult<String> {
        let workflow = self
            .workflow_repo
            .get_workflow(phase.workflow_id)
            .await?
            .ok_or(DomainError::WorkflowNotFound(phase.workflow_id))?;
        let total = self.workflow_repo.list_phases(phase.workflow_id).await?.len();
        Ok(phase.to_prompt_context(total, &workflow.name))
    }

    /// Best-effort memory retrieval from the vector index.
    async fn retrieve_memories(&self, text: &str) -> Vec<String> {
        let Some(index) = &self.vector_index else {
            return Vec::new();
        };
        let embedding = match self.embeddings.generate(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "Memory retrieval embedding failed");
                return Vec::new();
            }
        };
        let filter = json!({"must": [{"key": "kind", "match": {"value": "memory"}}]});
        match index.search(&embedding, Some(filter), MEMORY_RETRIEVAL_LIMIT).await {
            Ok(points) => points
                .into_iter()
                .filter_map(|p| p.payload["content"].as_str().map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Memory retrieval failed; continuing without");
                Vec::new()
            }
        }
    }
}
