//! Monitoring repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ConductorAnalysisRecord, DetectedDuplicateRecord, DiagnosticRun, GuardianAnalysisRecord,
    SteeringRecord,
};

/// Repository interface for the append-only monitoring audit tables.
#[async_trait]
pub trait MonitoringRepository: Send + Sync {
    /// Persist a Guardian analysis, returning its row id.
    async fn save_guardian_analysis(&self, record: &GuardianAnalysisRecord) -> DomainResult<i64>;

    /// Most recent Guardian analyses for an agent, oldest first.
    async fn recent_guardian_analyses(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> DomainResult<Vec<GuardianAnalysisRecord>>;

    /// Persist a Conductor analysis, returning its row id.
    async fn save_conductor_analysis(&self, record: &ConductorAnalysisRecord) -> DomainResult<i64>;

    /// Most recent Conductor analyses, newest first.
    async fn recent_conductor_analyses(
        &self,
        limit: usize,
    ) -> DomainResult<Vec<ConductorAnalysisRecord>>;

    /// Persist a detected duplicate pair.
    async fn save_detected_duplicate(&self, record: &DetectedDuplicateRecord) -> DomainResult<()>;

    /// Persist a steering record (delivered or discarded).
    async fn save_steering(&self, record: &SteeringRecord) -> DomainResult<()>;

    /// Delivered steering records for an agent since the given RFC3339 time.
    async fn steering_since(
        &self,
        agent_id: Uuid,
        since: chrono::DateTime<chrono::Utc>,
    ) -> DomainResult<Vec<SteeringRecord>>;

    async fn create_diagnostic_run(&self, run: &DiagnosticRun) -> DomainResult<()>;

    async fn update_diagnostic_run(&self, run: &DiagnosticRun) -> DomainResult<()>;

    /// Most recent diagnostic run for a workflow.
    async fn latest_diagnostic_run(&self, workflow_id: Uuid)
        -> DomainResult<Option<DiagnosticRun>>;
}
