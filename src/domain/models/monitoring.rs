//! Monitoring domain models.
//!
//! Append-only audit records produced by the Guardian and Conductor loops,
//! plus the stuck-workflow diagnostic run log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of steering interventions the Guardian can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SteeringType {
    Stuck,
    Drifting,
    ViolatingConstraints,
    OverEngineering,
    Confused,
    OffTrack,
}

impl SteeringType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stuck => "stuck",
            Self::Drifting => "drifting",
            Self::ViolatingConstraints => "violating_constraints",
            Self::OverEngineering => "over_engineering",
            Self::Confused => "confused",
            Self::OffTrack => "off_track",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stuck" => Some(Self::Stuck),
            "drifting" => Some(Self::Drifting),
            "violating_constraints" => Some(Self::ViolatingConstraints),
            "over_engineering" => Some(Self::OverEngineering),
            "confused" => Some(Self::Confused),
            "off_track" => Some(Self::OffTrack),
            _ => None,
        }
    }
}

/// Persisted outcome of one Guardian trajectory analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianAnalysisRecord {
    pub id: Option<i64>,
    pub agent_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub current_phase: Option<String>,
    pub trajectory_aligned: bool,
    pub alignment_score: f32,
    pub needs_steering: bool,
    pub steering_type: Option<SteeringType>,
    pub steering_recommendation: Option<String>,
    pub trajectory_summary: String,
    /// Marker handed to the next analysis cycle to identify new output
    pub last_message_marker: Option<String>,
    pub accumulated_goal: Option<String>,
    pub current_focus: Option<String>,
    pub conversation_length: Option<i64>,
    /// Full analysis payload for reference
    pub details: Option<serde_json::Value>,
}

impl GuardianAnalysisRecord {
    pub fn new(agent_id: Uuid, trajectory_summary: impl Into<String>) -> Self {
        Self {
            id: None,
            agent_id,
            created_at: Utc::now(),
            current_phase: None,
            trajectory_aligned: true,
            alignment_score: 1.0,
            needs_steering: false,
            steering_type: None,
            steering_recommendation: None,
            trajectory_summary: trajectory_summary.into(),
            last_message_marker: None,
            accumulated_goal: None,
            current_focus: None,
            conversation_length: None,
            details: None,
        }
    }
}

/// Persisted outcome of one Conductor coherence analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorAnalysisRecord {
    pub id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub coherence_score: f32,
    pub num_agents: i64,
    pub system_status: String,
    pub duplicate_count: i64,
    pub termination_count: i64,
    pub coordination_count: i64,
    pub details: Option<serde_json::Value>,
}

/// A pair of agents the Conductor judged to be doing the same work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedDuplicateRecord {
    pub id: Option<i64>,
    pub conductor_analysis_id: Option<i64>,
    pub agent1_id: Option<Uuid>,
    pub agent2_id: Option<Uuid>,
    pub similarity_score: f32,
    pub work_description: String,
    pub created_at: DateTime<Utc>,
}

/// A steering message sent (or withheld) for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteeringRecord {
    pub id: Option<i64>,
    pub agent_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Steering type, suffixed "_DISCARDED" when withheld
    pub steering_type: String,
    pub message: String,
    /// False when the send was discarded (queued-message marker present)
    pub delivered: bool,
}

/// Status of a diagnostic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Record of a stuck-workflow diagnostic firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub diagnostic_agent_id: Option<Uuid>,
    pub diagnostic_task_id: Option<Uuid>,
    pub triggered_at: DateTime<Utc>,
    pub total_tasks_at_trigger: i64,
    pub done_tasks_at_trigger: i64,
    pub failed_tasks_at_trigger: i64,
    pub time_since_last_task_seconds: i64,
    pub tasks_created_count: i64,
    pub tasks_created_ids: Vec<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: DiagnosticStatus,
    pub workflow_goal: Option<String>,
    /// Snapshot of per-phase progress fed to the diagnostic agent
    pub phases_analyzed: Option<serde_json::Value>,
    /// Snapshot of recent terminated agents fed to the diagnostic agent
    pub agents_reviewed: Option<serde_json::Value>,
}

impl DiagnosticRun {
    pub fn new(workflow_id: Uuid, total: i64, done: i64, failed: i64, stuck_seconds: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            diagnostic_agent_id: None,
            diagnostic_task_id: None,
            triggered_at: Utc::now(),
            total_tasks_at_trigger: total,
            done_tasks_at_trigger: done,
            failed_tasks_at_trigger: failed,
            time_since_last_task_seconds: stuck_seconds,
            tasks_created_count: 0,
            tasks_created_ids: Vec::new(),
            completed_at: None,
            status: DiagnosticStatus::Created,
            workflow_goal: None,
            phases_analyzed: None,
            agents_reviewed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steering_type_round_trip() {
        for t in [
            SteeringType::Stuck,
            SteeringType::Drifting,
            SteeringType::ViolatingConstraints,
            SteeringType::OverEngineering,
            SteeringType::Confused,
            SteeringType::OffTrack,
        ] {
            assert_eq!(SteeringType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_guardian_record_defaults_healthy() {
        let rec = GuardianAnalysisRecord::new(Uuid::new_v4(), "on track");
        assert!(rec.trajectory_aligned);
        assert!(!rec.needs_steering);
        assert!(rec.alignment_score >= 1.0);
    }
}
