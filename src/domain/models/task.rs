//! Task domain model.
//!
//! Tasks are discrete units of work dispatched to external coding agents.
//! They flow through a queue with priority ordering, may be deduplicated by
//! embedding similarity within a phase, and can be gated by a validator
//! before completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known creator id stamped on tasks created by the monitor itself.
pub const MONITOR_AGENT: &str = "monitor";

/// Status of a task in the orchestration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, enrichment pipeline not finished
    Pending,
    /// Waiting for an agent slot
    Queued,
    /// Ticket dependencies prevent the task from running
    Blocked,
    /// An agent has been spawned for the task
    Assigned,
    /// The agent reported active progress
    InProgress,
    /// Agent claims done, validation commit pending
    UnderReview,
    /// Validator agent is reviewing the committed work
    ValidationInProgress,
    /// Validator rejected; feedback routed back to the agent
    NeedsWork,
    /// Completed (and merged when a worktree was used)
    Done,
    /// Failed terminally
    Failed,
    /// Deduplicated against an earlier task in the same phase
    Duplicated,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Blocked => "blocked",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::UnderReview => "under_review",
            Self::ValidationInProgress => "validation_in_progress",
            Self::NeedsWork => "needs_work",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Duplicated => "duplicated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "blocked" => Some(Self::Blocked),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "under_review" => Some(Self::UnderReview),
            "validation_in_progress" => Some(Self::ValidationInProgress),
            "needs_work" => Some(Self::NeedsWork),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "duplicated" => Some(Self::Duplicated),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Duplicated)
    }

    /// States in which a task counts as actively being worked on.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Assigned
                | Self::InProgress
                | Self::UnderReview
                | Self::ValidationInProgress
        )
    }

    /// States in which an agent must be assigned to the task.
    pub fn requires_agent(&self) -> bool {
        matches!(
            self,
            Self::Assigned | Self::InProgress | Self::UnderReview | Self::ValidationInProgress
        )
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Queued, Self::Blocked, Self::Assigned, Self::Failed, Self::Duplicated],
            Self::Queued => &[Self::Assigned, Self::Blocked, Self::Failed],
            Self::Blocked => &[Self::Queued, Self::Failed],
            Self::Assigned => &[Self::InProgress, Self::UnderReview, Self::Done, Self::Failed],
            Self::InProgress => &[Self::UnderReview, Self::Done, Self::Failed],
            Self::UnderReview => &[Self::ValidationInProgress, Self::Failed],
            Self::ValidationInProgress => &[Self::Done, Self::NeedsWork, Self::Failed],
            Self::NeedsWork => &[Self::Assigned],
            Self::Done | Self::Failed | Self::Duplicated => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Priority level for tasks. Ordering derives the queue rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A related task reference with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedTask {
    pub id: Uuid,
    pub similarity: f32,
}

/// A discrete unit of work executed by an external coding agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Description as submitted by the caller
    pub raw_description: String,
    /// LLM-enriched description (None until enrichment runs)
    pub enriched_description: Option<String>,
    /// Criterion that defines completion
    pub done_definition: String,
    /// Current status
    pub status: TaskStatus,
    /// Priority
    pub priority: TaskPriority,
    /// Agent currently responsible for the task
    pub assigned_agent_id: Option<Uuid>,
    /// Who created the task (agent id or a system name like "monitor")
    pub created_by_agent_id: Option<String>,
    /// Parent task (for subtasks)
    pub parent_task_id: Option<Uuid>,
    /// Phase this task belongs to
    pub phase_id: Option<Uuid>,
    /// Workflow this task is part of
    pub workflow_id: Option<Uuid>,
    /// Associated ticket
    pub ticket_id: Option<Uuid>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Completion summary or blocking reason
    pub completion_notes: Option<String>,
    /// Why the task failed, when it did
    pub failure_reason: Option<String>,
    /// Complexity estimate from enrichment (1-10)
    pub estimated_complexity: Option<i32>,
    /// Whether a validator gates completion
    pub validation_enabled: bool,
    /// How many validation rounds have run
    pub validation_iteration: i32,
    /// Feedback from the most recent failed validation
    pub last_validation_feedback: Option<String>,
    /// Whether the agent reported formal results
    pub has_results: bool,
    /// Embedding of the enriched description
    pub embedding: Option<Vec<f32>>,
    /// Related (but not duplicate) tasks by similarity
    pub related_tasks: Vec<RelatedTask>,
    /// Original task when this one was deduplicated
    pub duplicate_of_task_id: Option<Uuid>,
    /// Similarity to the duplicate_of task
    pub similarity_score: Option<f32>,
    /// When the task entered the queue
    pub queued_at: Option<DateTime<Utc>>,
    /// 1-based rank within the queue (display only; recomputed on mutation)
    pub queue_position: Option<i64>,
    /// Manually boosted to jump the queue
    pub priority_boosted: bool,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task from a raw description and done criterion.
    pub fn new(raw_description: impl Into<String>, done_definition: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            raw_description: raw_description.into(),
            enriched_description: None,
            done_definition: done_definition.into(),
            status: TaskStatus::default(),
            priority: TaskPriority::default(),
            assigned_agent_id: None,
            created_by_agent_id: None,
            parent_task_id: None,
            phase_id: None,
            workflow_id: None,
            ticket_id: None,
            started_at: None,
            completed_at: None,
            completion_notes: None,
            failure_reason: None,
            estimated_complexity: None,
            validation_enabled: false,
            validation_iteration: 0,
            last_validation_feedback: None,
            has_results: false,
            embedding: None,
            related_tasks: Vec::new(),
            duplicate_of_task_id: None,
            similarity_score: None,
            queued_at: None,
            queue_position: None,
            priority_boosted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the creating agent.
    pub fn with_created_by(mut self, agent: impl Into<String>) -> Self {
        self.created_by_agent_id = Some(agent.into());
        self
    }

    /// Attach to a ticket.
    pub fn with_ticket(mut self, ticket_id: Uuid) -> Self {
        self.ticket_id = Some(ticket_id);
        self
    }

    /// Attach to a phase within a workflow.
    pub fn with_phase(mut self, phase_id: Uuid, workflow_id: Uuid) -> Self {
        self.phase_id = Some(phase_id);
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Attach to a workflow without a phase (diagnostic tasks).
    pub fn with_workflow(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    /// Set parent task.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_id);
        self
    }

    /// The best available description: enriched when present, raw otherwise.
    pub fn description(&self) -> &str {
        self.enriched_description
            .as_deref()
            .unwrap_or(&self.raw_description)
    }

    /// Whether enrichment has produced a real description yet.
    pub fn is_enriched(&self) -> bool {
        self.enriched_description
            .as_deref()
            .is_some_and(|d| !d.is_empty() && !d.starts_with("[Processing]"))
    }

    /// Check if the task can transition to the given status.
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status, updating the lifecycle timestamps.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }
        self.apply_status(new_status);
        Ok(())
    }

    /// Force a status, bypassing the state machine.
    ///
    /// Only for crash recovery, reconciliation, and test setup. Every call
    /// is logged so bypass sites stay visible.
    pub fn force_status(&mut self, new_status: TaskStatus, reason: &str) {
        tracing::warn!(
            task_id = %self.id,
            from = %self.status.as_str(),
            to = %new_status.as_str(),
            reason,
            "Forcing task status transition (bypassing state machine)"
        );
        self.apply_status(new_status);
    }

    fn apply_status(&mut self, new_status: TaskStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
        match new_status {
            TaskStatus::Assigned => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Duplicated => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        // Queue bookkeeping: position only exists while queued.
        if new_status != TaskStatus::Queued {
            self.queue_position = None;
        }
    }

    /// Check if task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate structural integrity before persistence.
    pub fn validate(&self) -> Result<(), String> {
        if self.raw_description.trim().is_empty() {
            return Err("Task description cannot be empty".to_string());
        }
        if self.done_definition.trim().is_empty() {
            return Err("Task done definition cannot be empty".to_string());
        }
        if self.parent_task_id == Some(self.id) {
            return Err("Task cannot be its own parent".to_string());
        }
        if self.duplicate_of_task_id == Some(self.id) {
            return Err("Task cannot be a duplicate of itself".to_string());
        }
        Ok(())
    }
}
