//! Validation pipeline for tasks and workflow results.
//!
//! Task path: an agent reporting done on a validation-enabled task goes
//! under review; its work is committed and a validator agent (forked from the
//! worker's branch) judges it. Pass merges to the parent and terminates both
//! agents; fail routes feedback back and the worker continues.
//!
//! Workflow path: submitted markdown results are gated by a result-validator
//! agent before the workflow counts as complete.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Agent, AgentType, ResultStatus, Task, TaskStatus, ValidationReview, Workflow, WorkflowResult,
};
use crate::domain::ports::{
    AgentRepository, TaskRepository, WorkflowRepository,
};
use crate::services::agent_manager::{AgentManager, SpawnRequest};
use crate::services::ticket_service::TicketService;
use crate::services::worktree_manager::WorktreeManager;

/// Outcome of a recorded task-validation verdict.
#[derive(Debug, Clone)]
pub struct VerdictOutcome {
    pub task_status: TaskStatus,
    /// Merge commit created on pass
    pub merge_commit_sha: Option<String>,
    /// Whether the original agent was terminated
    pub original_terminated: bool,
}

/// Gates task and workflow-result lifecycle on validator-agent verdicts.
pub struct ValidationService {
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    workflow_repo: Arc<dyn WorkflowRepository>,
    agent_manager: Arc<AgentManager>,
    worktree_manager: Arc<WorktreeManager>,
    ticket_service: Arc<TicketService>,
    main_repo_path: String,
}

impl ValidationService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        workflow_repo: Arc<dyn WorkflowRepository>,
        agent_manager: Arc<AgentManager>,
        worktree_manager: Arc<WorktreeManager>,
        ticket_service: Arc<TicketService>,
        main_repo_path: String,
    ) -> Self {
        Self {
            task_repo,
            agent_repo,
            workflow_repo,
            agent_manager,
            worktree_manager,
            ticket_service,
            main_repo_path,
        }
    }

    /// Start a validation round for a task whose agent reported done.
    ///
    /// Marks the task under review, commits the worktree, spawns a validator
    /// forked from the worker's branch, and keeps the worker alive for
    /// feedback. Returns the validator agent.
    pub async fn begin_task_validation(
        &self,
        task_id: Uuid,
        original_agent_id: Uuid,
        summary: Option<String>,
    ) -> DomainResult<Agent> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        task.force_status(TaskStatus::UnderReview, "agent reported done, validation enabled");
        task.validation_iteration += 1;
        task.completion_notes = summary;
        self.task_repo.update(&task).await?;

        let mut original = self
            .agent_repo
            .get(original_agent_id)
            .await?
            .ok_or(DomainError::AgentNotFound(original_agent_id))?;
        original.kept_alive_for_validation = true;
        self.agent_repo.update(&original).await?;

        let commit_sha = match self
            .worktree_manager
            .commit_for_validation(original_agent_id, task.validation_iteration)
            .await
        {
            Ok(sha) => sha,
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Failed to create validation commit");
                "HEAD".to_string()
            }
        };

        let prompt = validator_prompt(&task, &commit_sha);
        let validator = self
            .agent_manager
            .spawn(SpawnRequest {
                task: &task,
                enriched_description: task.description().to_string(),
                memories: vec![],
                project_context: String::new(),
                phase_context: None,
                agent_type: AgentType::Validator,
                use_existing_worktree: false,
                working_dir: None,
                parent_agent_id: Some(original_agent_id),
                prompt_override: Some(prompt),
            })
            .await?;

        task.force_status(TaskStatus::ValidationInProgress, "validator spawned");
        self.task_repo.update(&task).await?;

        tracing::info!(
            %task_id,
            validator_id = %validator.id,
            iteration = task.validation_iteration,
            %commit_sha,
            "Validation spawned"
        );
        Ok(validator)
    }

    /// Record a validator's verdict for a task.
    pub async fn record_task_verdict(
        &self,
        task_id: Uuid,
        validator_agent_id: Uuid,
        passed: bool,
        feedback: String,
    ) -> DomainResult<VerdictOutcome> {
        let mut task = self
            .task_repo
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::ValidationInProgress {
            return Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: if passed { "done" } else { "assigned" }.to_string(),
                reason: "task is not in validation".to_string(),
            });
        }

        self.workflow_repo
            .create_validation_review(&ValidationReview::new(
                task_id,
                validator_agent_id,
                task.validation_iteration,
                passed,
                feedback.clone(),
            ))
            .await?;

        let original_agent_id = task.assigned_agent_id;

        if passed {
            task.force_status(TaskStatus::Done, "validation passed");
            task.last_validation_feedback = Some(feedback);
            self.task_repo.update(&task).await?;

            let mut merge_commit_sha = None;
            if let Some(agent_id) = original_agent_id {
                match self.worktree_manager.merge_to_parent(agent_id).await {
                    Ok(sha) => {
                        merge_commit_sha = Some(sha.clone());
                        if let Some(ticket_id) = task.ticket_id {
                            if let Err(e) = self
                                .ticket_service
                                .link_commit(
                                    ticket_id,
                                    &agent_id.to_string(),
                                    &sha,
                                    &format!("Task {task_id} validated and merged"),
                                    "auto_task_completion",
                                )
                                .await
                            {
                                tracing::error!(%ticket_id, error = %e, "Failed to auto-link commit");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%task_id, error = %e, "Merge to parent failed after validation")
                    }
                }
                self.agent_manager.terminate(agent_id).await?;
            }
            self.agent_manager.terminate(validator_agent_id).await?;

            tracing::info!(%task_id, "Validation passed; task done");
            return Ok(VerdictOutcome {
                task_status: TaskStatus::Done,
                merge_commit_sha,
                original_terminated: true,
            });
        }

        // Fail: back to the worker with feedback; validator is done.
        task.force_status(TaskStatus::Assigned, "validation failed, returning to agent");
        task.last_validation_feedback = Some(feedback.clone());
        self.task_repo.update(&task).await?;

        if let Some(agent_id) = original_agent_id {
            let message = format!("Validation feedback: {feedback}");
            if let Err(e) = self.agent_manager.send(agent_id, &message).await {
                tracing::error!(%agent_id, error = %e, "Failed to deliver validation feedback");
            }
            let mut original = self
                .agent_repo
                .get(agent_id)
                .await?
                .ok_or(DomainError::AgentNotFound(agent_id))?;
            original.kept_alive_for_validation = false;
            self.agent_repo.update(&original).await?;
        }
        self.agent_manager.terminate(validator_agent_id).await?;

        tracing::info!(%task_id, "Validation failed; feedback routed to agent");
        Ok(VerdictOutcome {
            task_status: TaskStatus::Assigned,
            merge_commit_sha: None,
            original_terminated: false,
        })
    }

    /// Record a markdown workflow result and spawn a result validator.
    pub async fn submit_workflow_result(
        &self,
        workflow_id: Uuid,
        agent_id: Uuid,
        result_file_path: String,
        result_content: String,
    ) -> DomainResult<WorkflowResult> {
        let workflow = self
            .workflow_repo
            .get_workflow(workflow_id)
            .await?
            .ok_or(DomainError::WorkflowNotFound(workflow_id))?;

        let result = WorkflowResult::new(workflow_id, agent_id, result_file_path, result_content);
        self.workflow_repo.create_result(&result).await?;

        let task = self.result_validation_task(&workflow, &result);
        self.task_repo.create(&task).await?;

        let prompt = result_validator_prompt(&workflow, &result);
        let validator = self
            .agent_manager
            .spawn(SpawnRequest {
                task: &task,
                enriched_description: task.description().to_string(),
                memories: vec![],
                project_context: String::new(),
                phase_context: None,
                agent_type: AgentType::ResultValidator,
                use_existing_worktree: true,
                working_dir: Some(self.main_repo_path.clone()),
                parent_agent_id: None,
                prompt_override: Some(prompt),
            })
            .await?;

        let mut task = task;
        task.assigned_agent_id = Some(validator.id);
        task.force_status(TaskStatus::Assigned, "result validator spawned");
        self.task_repo.update(&task).await?;

        tracing::info!(
            %workflow_id,
            result_id = %result.id,
            validator_id = %validator.id,
            "Workflow result submitted for validation"
        );
        Ok(result)
    }

    /// Record a result-validator verdict for a workflow result.
    pub async fn record_result_verdict(
        &self,
        result_id: Uuid,
        validator_agent_id: Uuid,
        passed: bool,
        feedback: String,
    ) -> DomainResult<WorkflowResult> {
        let mut result = self
            .workflow_repo
            .get_result(result_id)
            .await?
            .ok_or_else(|| DomainError::InvalidArgument(format!("Result not found: {result_id}")))?;

        if result.status != ResultStatus::PendingValidation {
            return Err(DomainError::InvalidStateTransition {
                from: result.status.as_str().to_string(),
                to: if passed { "validated" } else { "rejected" }.to_string(),
                reason: "result is not pending validation".to_string(),
            });
        }

        result.validated_by_agent_id = Some(validator_agent_id);
        result.validated_at = Some(Utc::now());
        result.validation_feedback = Some(feedback.clone());

        if passed {
            result.status = ResultStatus::Validated;
            self.workflow_repo.update_result(&result).await?;

            let mut workflow = self
                .workflow_repo
                .get_workflow(result.workflow_id)
                .await?
                .ok_or(DomainError::WorkflowNotFound(result.workflow_id))?;
            workflow.result_found = true;
            workflow.result_id = Some(result.id);
            workflow.updated_at = Utc::now();
            self.workflow_repo.update_workflow(&workflow).await?;

            self.agent_manager.terminate(result.agent_id).await?;
            self.agent_manager.terminate(validator_agent_id).await?;
            tracing::info!(result_id = %result.id, "Workflow result validated");
        } else {
            result.status = ResultStatus::Rejected;
            self.workflow_repo.update_result(&result).await?;

            let message = format!("Result validation feedback: {feedback}");
            if let Err(e) = self.agent_manager.send(result.agent_id, &message).await {
                tracing::error!(agent_id = %result.agent_id, error = %e, "Failed to deliver result feedback");
            }
            self.agent_manager.terminate(validator_agent_id).await?;
            tracing::info!(result_id = %result.id, "Workflow result rejected");
        }

        Ok(result)
    }

    fn result_validation_task(&self, workflow: &Workflow, result: &WorkflowResult) -> Task {
        let mut task = Task::new(
            format!("Validate submitted result for workflow {}", workflow.name),
            "A clear pass/fail verdict with evidence against the workflow goal",
        )
        .with_workflow(workflow.id)
        .with_created_by(crate::domain::models::MONITOR_AGENT);
        task.enriched_description = Some(format!(
            "Validate result {} for workflow {}",
            result.id, workflow.name
        ));
        task
    }
}

fn validator_prompt(task: &Task, commit_sha: &str) -> String {
    format!(
        "You are a validation agent. Another agent claims the following task is complete.\n\n\
         ## Task under review\n{}\n\n\
         ## Definition of done\n{}\n\n\
         ## Committed work\nThe work is committed as {commit_sha} on the current branch; this \
         worktree is forked from it. Review the changes (git log, git diff, run the code and \
         tests) and decide whether the definition of done is genuinely met.\n\n\
         Report verdict pass with evidence, or verdict fail with specific, actionable feedback.\n\
         Task id: {}\nValidation iteration: {}\n",
        task.description(),
        task.done_definition,
        task.id,
        task.validation_iteration
    )
}

fn result_validator_prompt(workflow: &Workflow, result: &WorkflowResult) -> String {
    format!(
        "You are a result validation agent for workflow '{}'.\n\n\
         ## Workflow goal\n{}\n\n\
         ## Submitted result ({})\n{}\n\n\
         Verify every claim in the result against the repository state. Report verdict pass when \
         the result genuinely satisfies the workflow goal, otherwise verdict fail with specific \
         feedback.\nResult id: {}\n",
        workflow.name,
        workflow.goal.as_deref().unwrap_or("Unknown goal"),
        result.result_file_path,
        result.result_content,
        result.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_prompt_carries_commit_and_iteration() {
        let mut task = Task::new("build parser", "fixture parses");
        task.validation_iteration = 2;
        let prompt = validator_prompt(&task, "abc123");
        assert!(prompt.contains("abc123"));
        assert!(prompt.contains("Validation iteration: 2"));
        assert!(prompt.contains("fixture parses"));
    }

    #[test]
    fn test_result_validator_prompt_carries_goal() {
        let workflow = Workflow::new("ship-auth", Some("login flow works end to end".to_string()));
        let result = WorkflowResult::new(workflow.id, Uuid::new_v4(), "/tmp/r.md", "# Done");
        let prompt = result_validator_prompt(&workflow, &result);
        assert!(prompt.contains("login flow works end to end"));
        assert!(prompt.contains("# Done"));
    }
}
