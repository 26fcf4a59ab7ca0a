//! Workflow and phase domain models.
//!
//! A workflow owns an ordered list of phases. Phase completion cascades into
//! spawning the initial task of the next phase. Workflow results are
//! markdown artifacts gated by a result-validator agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Completed,
    Paused,
    Failed,
}

impl Default for WorkflowStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "paused" => Some(Self::Paused),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A collection of ordered phases working toward a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    /// Result criteria the workflow is driving toward
    pub goal: Option<String>,
    pub status: WorkflowStatus,
    /// Set once a result has been validated
    pub result_found: bool,
    pub result_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, goal: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            goal,
            status: WorkflowStatus::Active,
            result_found: false,
            result_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a phase within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Validation policy attached to a phase, inherited by its tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseValidation {
    /// Whether tasks in this phase require a validator verdict
    #[serde(default = "default_validation_enabled")]
    pub enabled: bool,
    /// Extra criteria handed to the validator prompt
    #[serde(default)]
    pub criteria: Vec<String>,
}

fn default_validation_enabled() -> bool {
    true
}

/// A single phase of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// 1-based order within the workflow (unique per workflow)
    pub seq: i64,
    pub name: String,
    pub description: String,
    /// Completion criteria for the phase
    pub done_definitions: Vec<String>,
    pub additional_notes: Option<String>,
    /// Expected outputs description
    pub outputs: Option<String>,
    /// Instructions for the next phase
    pub next_steps: Option<String>,
    /// Default working directory for agents in this phase
    pub working_directory: Option<String>,
    pub validation: Option<PhaseValidation>,
    pub status: PhaseStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_summary: Option<String>,
}

impl Phase {
    pub fn new(
        workflow_id: Uuid,
        seq: i64,
        name: impl Into<String>,
        description: impl Into<String>,
        done_definitions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            seq,
            name: name.into(),
            description: description.into(),
            done_definitions,
            additional_notes: None,
            outputs: None,
            next_steps: None,
            working_directory: None,
            validation: None,
            status: PhaseStatus::Pending,
            completed_at: None,
            completion_summary: None,
        }
    }

    /// Whether tasks created in this phase inherit validation.
    pub fn validation_enabled(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.enabled)
    }

    /// Render the phase as a prompt context block for enrichment and agents.
    pub fn to_prompt_context(&self, total_phases: usize, workflow_name: &str) -> String {
        let mut out = format!(
            "## Workflow Phase Context\nWorkflow: {}\nCurrent position: Phase {} of {}: {}\n\n{}\n",
            workflow_name, self.seq, total_phases, self.name, self.description
        );
        if !self.done_definitions.is_empty() {
            out.push_str("\nPhase done definitions:\n");
            for d in &self.done_definitions {
                out.push_str(&format!("- {d}\n"));
            }
        }
        if let Some(notes) = &self.additional_notes {
            out.push_str(&format!("\nNotes: {notes}\n"));
        }
        out
    }

    /// Mark the phase complete with a summary.
    pub fn complete(&mut self, summary: impl Into<String>) {
        self.status = PhaseStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.completion_summary = Some(summary.into());
    }
}

/// Status of a submitted workflow result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    PendingValidation,
    Validated,
    Rejected,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingValidation => "pending_validation",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_validation" => Some(Self::PendingValidation),
            "validated" => Some(Self::Validated),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A workflow-level markdown result awaiting or past validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub agent_id: Uuid,
    pub result_file_path: String,
    pub result_content: String,
    pub status: ResultStatus,
    pub validation_feedback: Option<String>,
    pub validated_by_agent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl WorkflowResult {
    pub fn new(
        workflow_id: Uuid,
        agent_id: Uuid,
        result_file_path: impl Into<String>,
        result_content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            agent_id,
            result_file_path: result_file_path.into(),
            result_content: result_content.into(),
            status: ResultStatus::PendingValidation,
            validation_feedback: None,
            validated_by_agent_id: None,
            created_at: Utc::now(),
            validated_at: None,
        }
    }
}

/// A validator agent's verdict on one validation iteration of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReview {
    pub id: Uuid,
    pub task_id: Uuid,
    pub validator_agent_id: Uuid,
    pub iteration_number: i32,
    pub validation_passed: bool,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

impl ValidationReview {
    pub fn new(
        task_id: Uuid,
        validator_agent_id: Uuid,
        iteration_number: i32,
        validation_passed: bool,
        feedback: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            validator_agent_id,
            iteration_number,
            validation_passed,
            feedback: feedback.into(),
            created_at: Utc::now(),
        }
    }
}

/// On-disk workflow definition loaded from YAML by `workflow load`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub phases: Vec<PhaseDefinition>,
}

/// Phase entry in a workflow definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub done_definitions: Vec<String>,
    #[serde(default)]
    pub additional_notes: Option<String>,
    #[serde(default)]
    pub outputs: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub validation: Option<PhaseValidation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_prompt_context() {
        let wf = Workflow::new("build", None);
        let phase = Phase::new(
            wf.id,
            2,
            "Implementation",
            "Write the code",
            vec!["tests pass".to_string()],
        );
        let ctx = phase.to_prompt_context(3, &wf.name);
        assert!(ctx.contains("Phase 2 of 3"));
        assert!(ctx.contains("tests pass"));
    }

    #[test]
    fn test_phase_validation_inheritance() {
        let mut phase = Phase::new(Uuid::new_v4(), 1, "p", "d", vec![]);
        assert!(!phase.validation_enabled());
        phase.validation = Some(PhaseValidation { enabled: true, criteria: vec![] });
        assert!(phase.validation_enabled());
    }

    #[test]
    fn test_workflow_definition_yaml() {
        let yaml = r#"
name: demo
goal: ship the feature
phases:
  - name: Research
    description: Understand the problem
    done_definitions:
      - findings documented
  - name: Build
    description: Implement it
    validation:
      enabled: true
"#;
        let def: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.phases.len(), 2);
        assert!(def.phases[1].validation.as_ref().unwrap().enabled);
    }

    #[test]
    fn test_result_status_round_trip() {
        for s in [ResultStatus::PendingValidation, ResultStatus::Validated, ResultStatus::Rejected] {
            assert_eq!(ResultStatus::from_str(s.as_str()), Some(s));
        }
    }
}
