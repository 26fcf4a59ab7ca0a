//! Ticket domain models.
//!
//! Tickets live on a per-workflow configurable board. A ticket with unresolved
//! blockers cannot change status and propagates "blocked" to any task linked
//! to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority level for tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TicketPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// A tracked unit of work on a workflow board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub created_by_agent_id: String,
    pub assigned_agent_id: Option<String>,
    pub title: String,
    pub description: String,
    /// One of the board's allowed types (bug, feature, task, spike, ...)
    pub ticket_type: String,
    pub priority: TicketPriority,
    /// Current board column
    pub status: String,
    pub parent_ticket_id: Option<Uuid>,
    pub related_task_ids: Vec<Uuid>,
    pub tags: Vec<String>,
    /// Weighted embedding of title/description/tags
    pub embedding: Option<Vec<f32>>,
    /// Tickets that must resolve before this one can move
    pub blocked_by_ticket_ids: Vec<Uuid>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn new(
        workflow_id: Uuid,
        created_by: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        ticket_type: impl Into<String>,
        priority: TicketPriority,
        status: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            created_by_agent_id: created_by.into(),
            assigned_agent_id: None,
            title: title.into(),
            description: description.into(),
            ticket_type: ticket_type.into(),
            priority,
            status: status.into(),
            parent_ticket_id: None,
            related_task_ids: Vec::new(),
            tags: Vec::new(),
            embedding: None,
            blocked_by_ticket_ids: Vec::new(),
            is_resolved: false,
            resolved_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether unresolved blockers currently pin this ticket in place.
    pub fn is_blocked(&self) -> bool {
        !self.blocked_by_ticket_ids.is_empty()
    }

    /// Text used for the weighted embedding: title ×2, tags ×~1.5, description ×1.
    pub fn embedding_text(&self) -> String {
        let tag_text = self.tags.join(" ");
        format!(
            "{} {} {} {} {}",
            self.title, self.title, self.description, tag_text, tag_text
        )
    }
}

/// Kind of a ticket comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    General,
    StatusChange,
    Assignment,
    Blocker,
    Resolution,
}

impl CommentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::StatusChange => "status_change",
            Self::Assignment => "assignment",
            Self::Blocker => "blocker",
            Self::Resolution => "resolution",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Self::General),
            "status_change" => Some(Self::StatusChange),
            "assignment" => Some(Self::Assignment),
            "blocker" => Some(Self::Blocker),
            "resolution" => Some(Self::Resolution),
            _ => None,
        }
    }
}

/// A comment on a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub agent_id: String,
    pub comment_text: String,
    pub comment_type: CommentKind,
    pub created_at: DateTime<Utc>,
}

impl TicketComment {
    pub fn new(
        ticket_id: Uuid,
        agent_id: impl Into<String>,
        comment_text: impl Into<String>,
        comment_type: CommentKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            agent_id: agent_id.into(),
            comment_text: comment_text.into(),
            comment_type,
            created_at: Utc::now(),
        }
    }
}

/// Audit entry for any ticket change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketHistoryEntry {
    pub id: Option<i64>,
    pub ticket_id: Uuid,
    pub agent_id: String,
    /// created, status_changed, assigned, commented, field_updated,
    /// commit_linked, blocked, unblocked, resolved
    pub change_type: String,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_description: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl TicketHistoryEntry {
    pub fn new(
        ticket_id: Uuid,
        agent_id: impl Into<String>,
        change_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            ticket_id,
            agent_id: agent_id.into(),
            change_type: change_type.into(),
            field_name: None,
            old_value: None,
            new_value: None,
            change_description: None,
            changed_at: Utc::now(),
        }
    }

    pub fn with_values(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.change_description = Some(description.into());
        self
    }
}

/// A git commit linked to a ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketCommitLink {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub agent_id: String,
    pub commit_sha: String,
    pub commit_message: String,
    pub files_changed: Option<i64>,
    pub insertions: Option<i64>,
    pub deletions: Option<i64>,
    pub linked_at: DateTime<Utc>,
    /// manual, auto_task_completion, status_change, resolution
    pub link_method: String,
}

impl TicketCommitLink {
    pub fn new(
        ticket_id: Uuid,
        agent_id: impl Into<String>,
        commit_sha: impl Into<String>,
        commit_message: impl Into<String>,
        link_method: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            agent_id: agent_id.into(),
            commit_sha: commit_sha.into(),
            commit_message: commit_message.into(),
            files_changed: None,
            insertions: None,
            deletions: None,
            linked_at: Utc::now(),
            link_method: link_method.into(),
        }
    }
}

/// Per-workflow kanban board configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    /// Ordered column ids; a ticket's status must be one of these
    pub columns: Vec<String>,
    /// Allowed ticket types
    pub ticket_types: Vec<String>,
    pub default_ticket_type: Option<String>,
    /// Status assigned to new tickets; must be a column
    pub initial_status: String,
    pub allow_reopen: bool,
    pub require_comments_on_status_change: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BoardConfig {
    /// A conventional default board for a workflow.
    pub fn default_for_workflow(workflow_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            name: name.into(),
            columns: vec![
                "backlog".to_string(),
                "in_progress".to_string(),
                "review".to_string(),
                "done".to_string(),
            ],
            ticket_types: vec![
                "bug".to_string(),
                "feature".to_string(),
                "improvement".to_string(),
                "task".to_string(),
                "spike".to_string(),
            ],
            default_ticket_type: Some("task".to_string()),
            initial_status: "backlog".to_string(),
            allow_reopen: true,
            require_comments_on_status_change: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate structural integrity (columns non-empty, initial ∈ columns).
    pub fn validate(&self) -> Result<(), String> {
        if self.columns.is_empty() {
            return Err("Board must have at least one column".to_string());
        }
        if self.ticket_types.is_empty() {
            return Err("Board must allow at least one ticket type".to_string());
        }
        if !self.columns.contains(&self.initial_status) {
            return Err(format!(
                "Initial status '{}' is not one of the board columns",
                self.initial_status
            ));
        }
        Ok(())
    }

    pub fn is_valid_status(&self, status: &str) -> bool {
        self.columns.iter().any(|c| c == status)
    }

    pub fn is_valid_type(&self, ticket_type: &str) -> bool {
        self.ticket_types.iter().any(|t| t == ticket_type)
    }

    /// Last column counts as the completion status.
    pub fn completion_status(&self) -> Option<&str> {
        self.columns.last().map(String::as_str)
    }
}
