//! Agent domain model.
//!
//! An agent is a managed external CLI instance running inside an isolated
//! terminal-multiplexer session, working in its own git worktree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a managed agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Session exists, no work delivered yet
    Idle,
    /// Actively working a task
    Working,
    /// Monitor flagged the agent as unresponsive
    Stuck,
    /// Session killed, transcript archived
    Terminated,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Stuck => "stuck",
            Self::Terminated => "terminated",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "working" => Some(Self::Working),
            "stuck" => Some(Self::Stuck),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// What role an agent plays in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Regular task-executing agent inside a workflow phase
    Phase,
    /// Reviews another agent's committed task work
    Validator,
    /// Reviews a submitted workflow result
    ResultValidator,
    /// Spawned by the monitor (phase progression tasks)
    Monitor,
    /// One-shot stuck-workflow analyst
    Diagnostic,
}

impl Default for AgentType {
    fn default() -> Self {
        Self::Phase
    }
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Validator => "validator",
            Self::ResultValidator => "result_validator",
            Self::Monitor => "monitor",
            Self::Diagnostic => "diagnostic",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "phase" => Some(Self::Phase),
            "validator" => Some(Self::Validator),
            "result_validator" => Some(Self::ResultValidator),
            "monitor" => Some(Self::Monitor),
            "diagnostic" => Some(Self::Diagnostic),
            _ => None,
        }
    }

    /// Validation agents are never terminated by duplicate detection.
    pub fn is_protected_from_duplicate_termination(&self) -> bool {
        matches!(self, Self::Validator | Self::ResultValidator)
    }
}

/// A managed external coding-agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: Uuid,
    /// Full initial system prompt delivered into the session
    pub system_prompt: String,
    /// Current status
    pub status: AgentStatus,
    /// Which CLI the session runs (e.g. "claude")
    pub cli_type: String,
    /// Terminal session name; unique among non-terminated agents
    pub session_name: Option<String>,
    /// Task the agent is currently responsible for
    pub current_task_id: Option<Uuid>,
    /// Last observed activity
    pub last_activity: Option<DateTime<Utc>>,
    /// Consecutive health-check failures
    pub health_check_failures: i32,
    /// Role of the agent
    pub agent_type: AgentType,
    /// Kept alive awaiting a validator verdict
    pub kept_alive_for_validation: bool,
    /// When created
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new working agent bound to a task.
    pub fn new(
        system_prompt: impl Into<String>,
        cli_type: impl Into<String>,
        agent_type: AgentType,
        task_id: Uuid,
    ) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            system_prompt: system_prompt.into(),
            status: AgentStatus::Working,
            cli_type: cli_type.into(),
            session_name: None,
            current_task_id: Some(task_id),
            last_activity: Some(now),
            health_check_failures: 0,
            agent_type,
            kept_alive_for_validation: false,
            created_at: now,
        }
    }

    /// Derive the session name for this agent from a configured prefix.
    pub fn session_name_for(prefix: &str, id: Uuid) -> String {
        format!("{}{}", prefix, &id.to_string()[..8])
    }

    /// Age of the agent in seconds.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Whether the agent still counts against the concurrency cap.
    pub fn is_active(&self) -> bool {
        self.status != AgentStatus::Terminated
    }
}

/// Kind of an agent log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// Initial prompt delivered into the session
    Input,
    /// Captured session output
    Output,
    /// A direct message delivered to the agent
    Message,
    /// Guardian steering
    Steering,
    /// Monitor intervention (restart, recreate, phase progression)
    Intervention,
    /// End-of-life transcript
    Terminated,
    /// Guardian analysis pointer
    GuardianAnalysis,
    /// Conductor analysis pointer
    ConductorAnalysis,
    /// Conductor-ordered termination
    Termination,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Message => "message",
            Self::Steering => "steering",
            Self::Intervention => "intervention",
            Self::Terminated => "terminated",
            Self::GuardianAnalysis => "guardian_analysis",
            Self::ConductorAnalysis => "conductor_analysis",
            Self::Termination => "termination",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Self::Input),
            "output" => Some(Self::Output),
            "message" => Some(Self::Message),
            "steering" => Some(Self::Steering),
            "intervention" => Some(Self::Intervention),
            "terminated" => Some(Self::Terminated),
            "guardian_analysis" => Some(Self::GuardianAnalysis),
            "conductor_analysis" => Some(Self::ConductorAnalysis),
            "termination" => Some(Self::Termination),
            _ => None,
        }
    }
}

/// Append-only log entry for agent activity and interventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLog {
    /// Row id (assigned by the store)
    pub id: Option<i64>,
    /// Owning agent; None for system-level entries
    pub agent_id: Option<Uuid>,
    /// Entry kind
    pub log_type: LogKind,
    /// Human-readable message
    pub message: String,
    /// Structured payload
    pub details: Option<serde_json::Value>,
    /// When recorded
    pub created_at: DateTime<Utc>,
}

impl AgentLog {
    pub fn new(agent_id: Uuid, log_type: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: None,
            agent_id: Some(agent_id),
            log_type,
            message: message.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    /// System-level entry not tied to a single agent.
    pub fn system(log_type: LogKind, message: impl Into<String>) -> Self {
        Self {
            id: None,
            agent_id: None,
            log_type,
            message: message.into(),
            details: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_creation() {
        let task_id = Uuid::new_v4();
        let agent = Agent::new("prompt", "claude", AgentType::Phase, task_id);
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.current_task_id, Some(task_id));
        assert!(agent.is_active());
    }

    #[test]
    fn test_session_name_derivation() {
        let id = Uuid::parse_str("12345678-1234-1234-1234-123456789abc").unwrap();
        assert_eq!(Agent::session_name_for("agent-", id), "agent-12345678");
    }

    #[test]
    fn test_validator_protection() {
        assert!(AgentType::Validator.is_protected_from_duplicate_termination());
        assert!(AgentType::ResultValidator.is_protected_from_duplicate_termination());
        assert!(!AgentType::Phase.is_protected_from_duplicate_termination());
    }

    #[test]
    fn test_terminated_agent_is_inactive() {
        let mut agent = Agent::new("p", "claude", AgentType::Phase, Uuid::new_v4());
        agent.status = AgentStatus::Terminated;
        assert!(!agent.is_active());
    }

    #[test]
    fn test_log_kind_round_trip() {
        for kind in [
            LogKind::Input,
            LogKind::Steering,
            LogKind::Terminated,
            LogKind::GuardianAnalysis,
        ] {
            assert_eq!(LogKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
