//! LLM capability port.
//!
//! The orchestrator never parses free-form model output: every call returns a
//! JSON object with the stable field names below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::SteeringType;

/// Request for task enrichment.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichTaskRequest {
    pub task_description: String,
    pub done_definition: String,
    /// Retrieved memory snippets relevant to the task
    pub context: Vec<String>,
    /// Rendered phase context, when the task belongs to a phase
    pub phase_context: Option<String>,
}

/// Enriched task returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTask {
    pub enriched_description: String,
    #[serde(default = "default_complexity")]
    pub estimated_complexity: i32,
}

fn default_complexity() -> i32 {
    5
}

/// Request for a per-agent trajectory analysis.
#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryRequest {
    /// Trailing session output
    pub agent_output: String,
    /// Distilled understanding of the whole session
    pub accumulated_context: Value,
    /// Previous Guardian summaries, oldest first
    pub past_summaries: Vec<Value>,
    /// Task and phase context
    pub task_info: Value,
    /// Marker from the previous analysis identifying already-seen output
    pub last_message_marker: Option<String>,
}

/// Trajectory analysis returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryAnalysis {
    #[serde(default)]
    pub current_phase: Option<String>,
    #[serde(default = "default_true")]
    pub trajectory_aligned: bool,
    #[serde(default = "default_score")]
    pub alignment_score: f32,
    #[serde(default)]
    pub alignment_issues: Vec<String>,
    #[serde(default)]
    pub needs_steering: bool,
    #[serde(default)]
    pub steering_type: Option<SteeringType>,
    #[serde(default)]
    pub steering_recommendation: Option<String>,
    #[serde(default)]
    pub trajectory_summary: String,
    #[serde(default)]
    pub last_claude_message_marker: Option<String>,
    #[serde(default)]
    pub current_focus: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_score() -> f32 {
    0.5
}

impl TrajectoryAnalysis {
    /// Healthy default used when the provider call fails.
    pub fn default_healthy() -> Self {
        Self {
            current_phase: None,
            trajectory_aligned: true,
            alignment_score: 0.5,
            alignment_issues: Vec::new(),
            needs_steering: false,
            steering_type: None,
            steering_recommendation: None,
            trajectory_summary: "LLM analysis unavailable - using default".to_string(),
            last_claude_message_marker: None,
            current_focus: None,
        }
    }
}

/// Request for system-wide coherence analysis.
#[derive(Debug, Clone, Serialize)]
pub struct CoherenceRequest {
    /// Guardian summaries from the current tick
    pub guardian_summaries: Vec<Value>,
    /// System-level goals handed to the model
    pub system_goals: Value,
}

/// Duplicate work pair reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateWork {
    pub agent1: String,
    pub agent2: String,
    #[serde(default)]
    pub similarity: f32,
    #[serde(default)]
    pub work: String,
}

/// Termination recommendation from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationRecommendation {
    pub agent_id: String,
    #[serde(default)]
    pub reason: String,
}

/// Coordination need reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationNeed {
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub action: String,
}

/// Coherence analysis returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceAnalysis {
    #[serde(default = "default_coherence")]
    pub coherence_score: f32,
    #[serde(default)]
    pub duplicates: Vec<DuplicateWork>,
    #[serde(default)]
    pub alignment_issues: Vec<String>,
    #[serde(default)]
    pub termination_recommendations: Vec<TerminationRecommendation>,
    #[serde(default)]
    pub coordination_needs: Vec<CoordinationNeed>,
    #[serde(default)]
    pub system_summary: String,
}

fn default_coherence() -> f32 {
    0.7
}

impl CoherenceAnalysis {
    /// Empty analysis used when no agents are active or the call fails.
    pub fn empty() -> Self {
        Self {
            coherence_score: 1.0,
            duplicates: Vec::new(),
            alignment_issues: Vec::new(),
            termination_recommendations: Vec::new(),
            coordination_needs: Vec::new(),
            system_summary: "No agents active".to_string(),
        }
    }
}

/// Capability interface over the LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;

    /// Generate an embedding vector for the text.
    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>>;

    /// Enrich a raw task description.
    async fn enrich_task(&self, request: EnrichTaskRequest) -> DomainResult<EnrichedTask>;

    /// Judge a single agent's trajectory.
    async fn analyze_agent_trajectory(
        &self,
        request: TrajectoryRequest,
    ) -> DomainResult<TrajectoryAnalysis>;

    /// Judge system-wide coherence across agents.
    async fn analyze_system_coherence(
        &self,
        request: CoherenceRequest,
    ) -> DomainResult<CoherenceAnalysis>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_analysis_defaults_from_sparse_json() {
        let analysis: TrajectoryAnalysis =
            serde_json::from_str(r#"{"trajectory_summary": "fine"}"#).unwrap();
        assert!(analysis.trajectory_aligned);
        assert!(!analysis.needs_steering);
        assert!((analysis.alignment_score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_coherence_analysis_parses_full_shape() {
        let json = r#"{
            "coherence_score": 0.4,
            "duplicates": [{"agent1": "a1", "agent2": "a2", "similarity": 0.9, "work": "jwt auth"}],
            "termination_recommendations": [{"agent_id": "a2", "reason": "duplicate of a1"}],
            "coordination_needs": [{"agents": ["a1", "a2"], "resource": "schema.sql", "action": "serialize"}],
            "system_summary": "two agents duplicating"
        }"#;
        let analysis: CoherenceAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.duplicates.len(), 1);
        assert_eq!(analysis.termination_recommendations[0].agent_id, "a2");
        assert_eq!(analysis.coordination_needs[0].agents.len(), 2);
    }
}
