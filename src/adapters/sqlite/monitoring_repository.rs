//! SQLite implementation of the MonitoringRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ConductorAnalysisRecord, DetectedDuplicateRecord, DiagnosticRun, DiagnosticStatus,
    GuardianAnalysisRecord, SteeringRecord, SteeringType,
};
use crate::domain::ports::MonitoringRepository;

#[derive(Clone)]
pub struct SqliteMonitoringRepository {
    pool: SqlitePool,
}

impl SqliteMonitoringRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitoringRepository for SqliteMonitoringRepository {
    async fn save_guardian_analysis(&self, record: &GuardianAnalysisRecord) -> DomainResult<i64> {
        let details_json = super::to_json_opt(&record.details)?;
        let result = sqlx::query(
            r#"INSERT INTO guardian_analyses (agent_id, created_at, current_phase,
               trajectory_aligned, alignment_score, needs_steering, steering_type,
               steering_recommendation, trajectory_summary, last_message_marker,
               accumulated_goal, current_focus, conversation_length, details)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.agent_id.to_string())
        .bind(record.created_at.to_rfc3339())
        .bind(&record.current_phase)
        .bind(record.trajectory_aligned)
        .bind(record.alignment_score)
        .bind(record.needs_steering)
        .bind(record.steering_type.map(|t| t.as_str()))
        .bind(&record.steering_recommendation)
        .bind(&record.trajectory_summary)
        .bind(&record.last_message_marker)
        .bind(&record.accumulated_goal)
        .bind(&record.current_focus)
        .bind(record.conversation_length)
        .bind(details_json)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn recent_guardian_analyses(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> DomainResult<Vec<GuardianAnalysisRecord>> {
        let rows: Vec<GuardianRow> = sqlx::query_as(
            r#"SELECT * FROM guardian_analyses WHERE agent_id = ?
               ORDER BY created_at DESC, id DESC LIMIT ?"#,
        )
        .bind(agent_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records: Vec<GuardianAnalysisRecord> = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<DomainResult<_>>()?;
        records.reverse(); // chronological order
        Ok(records)
    }

    async fn save_conductor_analysis(&self, record: &ConductorAnalysisRecord) -> DomainResult<i64> {
        let details_json = super::to_json_opt(&record.details)?;
        let result = sqlx::query(
            r#"INSERT INTO conductor_analyses (created_at, coherence_score, num_agents,
               system_status, duplicate_count, termination_count, coordination_count, details)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.created_at.to_rfc3339())
        .bind(record.coherence_score)
        .bind(record.num_agents)
        .bind(&record.system_status)
        .bind(record.duplicate_count)
        .bind(record.termination_count)
        .bind(record.coordination_count)
        .bind(details_json)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn recent_conductor_analyses(
        &self,
        limit: usize,
    ) -> DomainResult<Vec<ConductorAnalysisRecord>> {
        let rows: Vec<ConductorRow> = sqlx::query_as(
            "SELECT * FROM conductor_analyses ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_detected_duplicate(&self, record: &DetectedDuplicateRecord) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO detected_duplicates (conductor_analysis_id, agent1_id, agent2_id,
               similarity_score, work_description, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.conductor_analysis_id)
        .bind(record.agent1_id.map(|id| id.to_string()))
        .bind(record.agent2_id.map(|id| id.to_string()))
        .bind(record.similarity_score)
        .bind(&record.work_description)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_steering(&self, record: &SteeringRecord) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO steering_interventions (agent_id, created_at, steering_type, message, delivered)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(record.agent_id.to_string())
        .bind(record.created_at.to_rfc3339())
        .bind(&record.steering_type)
        .bind(&record.message)
        .bind(record.delivered)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn steering_since(
        &self,
        agent_id: Uuid,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<SteeringRecord>> {
        let rows: Vec<SteeringRow> = sqlx::query_as(
            r#"SELECT * FROM steering_interventions
               WHERE agent_id = ? AND delivered = 1 AND created_at >= ?
               ORDER BY created_at"#,
        )
        .bind(agent_id.to_string())
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_diagnostic_run(&self, run: &DiagnosticRun) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO diagnostic_runs (id, workflow_id, diagnostic_agent_id,
               diagnostic_task_id, triggered_at, total_tasks_at_trigger, done_tasks_at_trigger,
               failed_tasks_at_trigger, time_since_last_task_seconds, tasks_created_count,
               tasks_created_ids, completed_at, status, workflow_goal, phases_analyzed,
               agents_reviewed)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(run.diagnostic_agent_id.map(|id| id.to_string()))
        .bind(run.diagnostic_task_id.map(|id| id.to_string()))
        .bind(run.triggered_at.to_rfc3339())
        .bind(run.total_tasks_at_trigger)
        .bind(run.done_tasks_at_trigger)
        .bind(run.failed_tasks_at_trigger)
        .bind(run.time_since_last_task_seconds)
        .bind(run.tasks_created_count)
        .bind(serde_json::to_string(&run.tasks_created_ids)?)
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.status.as_str())
        .bind(&run.workflow_goal)
        .bind(super::to_json_opt(&run.phases_analyzed)?)
        .bind(super::to_json_opt(&run.agents_reviewed)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_diagnostic_run(&self, run: &DiagnosticRun) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE diagnostic_runs SET diagnostic_agent_id = ?, diagnostic_task_id = ?,
               tasks_created_count = ?, tasks_created_ids = ?, completed_at = ?, status = ?
               WHERE id = ?"#,
        )
        .bind(run.diagnostic_agent_id.map(|id| id.to_string()))
        .bind(run.diagnostic_task_id.map(|id| id.to_string()))
        .bind(run.tasks_created_count)
        .bind(serde_json::to_string(&run.tasks_created_ids)?)
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(run.status.as_str())
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::InvalidArgument(format!(
                "Diagnostic run not found: {}",
                run.id
            )));
        }
        Ok(())
    }

    async fn latest_diagnostic_run(
        &self,
        workflow_id: Uuid,
    ) -> DomainResult<Option<DiagnosticRun>> {
        let row: Option<DiagnosticRow> = sqlx::query_as(
            r#"SELECT * FROM diagnostic_runs WHERE workflow_id = ?
               ORDER BY triggered_at DESC LIMIT 1"#,
        )
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct GuardianRow {
    id: i64,
    agent_id: String,
    created_at: String,
    current_phase: Option<String>,
    trajectory_aligned: bool,
    alignment_score: f32,
    needs_steering: bool,
    steering_type: Option<String>,
    steering_recommendation: Option<String>,
    trajectory_summary: String,
    last_message_marker: Option<String>,
    accumulated_goal: Option<String>,
    current_focus: Option<String>,
    conversation_length: Option<i64>,
    details: Option<String>,
}

impl TryFrom<GuardianRow> for GuardianAnalysisRecord {
    type Error = DomainError;

    fn try_from(row: GuardianRow) -> Result<Self, Self::Error> {
        let details = row
            .details
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        Ok(GuardianAnalysisRecord {
            id: Some(row.id),
            agent_id: super::parse_uuid(&row.agent_id)?,
            created_at: super::parse_datetime(&row.created_at)?,
            current_phase: row.current_phase,
            trajectory_aligned: row.trajectory_aligned,
            alignment_score: row.alignment_score,
            needs_steering: row.needs_steering,
            steering_type: row.steering_type.as_deref().and_then(SteeringType::from_str),
            steering_recommendation: row.steering_recommendation,
            trajectory_summary: row.trajectory_summary,
            last_message_marker: row.last_message_marker,
            accumulated_goal: row.accumulated_goal,
            current_focus: row.current_focus,
            conversation_length: row.conversation_length,
            details,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConductorRow {
    id: i64,
    created_at: String,
    coherence_score: f32,
    num_agents: i64,
    system_status: String,
    duplicate_count: i64,
    termination_count: i64,
    coordination_count: i64,
    details: Option<String>,
}

impl TryFrom<ConductorRow> for ConductorAnalysisRecord {
    type Error = DomainError;

    fn try_from(row: ConductorRow) -> Result<Self, Self::Error> {
        let details = row
            .details
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        Ok(ConductorAnalysisRecord {
            id: Some(row.id),
            created_at: super::parse_datetime(&row.created_at)?,
            coherence_score: row.coherence_score,
            num_agents: row.num_agents,
            system_status: row.system_status,
            duplicate_count: row.duplicate_count,
            termination_count: row.termination_count,
            coordination_count: row.coordination_count,
            details,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SteeringRow {
    id: i64,
    agent_id: String,
    created_at: String,
    steering_type: String,
    message: String,
    delivered: bool,
}

impl TryFrom<SteeringRow> for SteeringRecord {
    type Error = DomainError;

    fn try_from(row: SteeringRow) -> Result<Self, Self::Error> {
        Ok(SteeringRecord {
            id: Some(row.id),
            agent_id: super::parse_uuid(&row.agent_id)?,
            created_at: super::parse_datetime(&row.created_at)?,
            steering_type: row.steering_type,
            message: row.message,
            delivered: row.delivered,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DiagnosticRow {
    id: String,
    workflow_id: String,
    diagnostic_agent_id: Option<String>,
    diagnostic_task_id: Option<String>,
    triggered_at: String,
    total_tasks_at_trigger: i64,
    done_tasks_at_trigger: i64,
    failed_tasks_at_trigger: i64,
    time_since_last_task_seconds: i64,
    tasks_created_count: i64,
    tasks_created_ids: Option<String>,
    completed_at: Option<String>,
    status: String,
    workflow_goal: Option<String>,
    phases_analyzed: Option<String>,
    agents_reviewed: Option<String>,
}

impl TryFrom<DiagnosticRow> for DiagnosticRun {
    type Error = DomainError;

    fn try_from(row: DiagnosticRow) -> Result<Self, Self::Error> {
        let status = DiagnosticStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let ids: Vec<String> = super::parse_json_or_default(row.tasks_created_ids)?;
        let phases_analyzed = row
            .phases_analyzed
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let agents_reviewed = row
            .agents_reviewed
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(DiagnosticRun {
            id: super::parse_uuid(&row.id)?,
            workflow_id: super::parse_uuid(&row.workflow_id)?,
            diagnostic_agent_id: super::parse_optional_uuid(row.diagnostic_agent_id)?,
            diagnostic_task_id: super::parse_optional_uuid(row.diagnostic_task_id)?,
            triggered_at: super::parse_datetime(&row.triggered_at)?,
            total_tasks_at_trigger: row.total_tasks_at_trigger,
            done_tasks_at_trigger: row.done_tasks_at_trigger,
            failed_tasks_at_trigger: row.failed_tasks_at_trigger,
            time_since_last_task_seconds: row.time_since_last_task_seconds,
            tasks_created_count: row.tasks_created_count,
            tasks_created_ids: ids.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect(),
            completed_at: super::parse_optional_datetime(row.completed_at)?,
            status,
            workflow_goal: row.workflow_goal,
            phases_analyzed,
            agents_reviewed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository};
    use crate::domain::models::{Agent, AgentType};
    use crate::domain::ports::AgentRepository;

    async fn setup() -> (SqliteMonitoringRepository, Uuid) {
        let pool = create_migrated_test_pool().await.unwrap();
        let agent = Agent::new("p", "claude", AgentType::Phase, Uuid::new_v4());
        SqliteAgentRepository::new(pool.clone()).create(&agent).await.unwrap();
        (SqliteMonitoringRepository::new(pool), agent.id)
    }

    #[tokio::test]
    async fn test_guardian_analyses_chronological() {
        let (repo, agent_id) = setup().await;

        for i in 0..3 {
            let mut rec = GuardianAnalysisRecord::new(agent_id, format!("summary {i}"));
            rec.created_at = Utc::now() + chrono::Duration::seconds(i);
            repo.save_guardian_analysis(&rec).await.unwrap();
        }

        let recent = repo.recent_guardian_analyses(agent_id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trajectory_summary, "summary 1");
        assert_eq!(recent[1].trajectory_summary, "summary 2");
    }

    #[tokio::test]
    async fn test_steering_since_excludes_discarded() {
        let (repo, agent_id) = setup().await;
        let t0 = Utc::now() - chrono::Duration::minutes(10);

        repo.save_steering(&SteeringRecord {
            id: None,
            agent_id,
            created_at: Utc::now(),
            steering_type: "confused".to_string(),
            message: "check imports".to_string(),
            delivered: true,
        })
        .await
        .unwrap();
        repo.save_steering(&SteeringRecord {
            id: None,
            agent_id,
            created_at: Utc::now(),
            steering_type: "confused_DISCARDED".to_string(),
            message: "held".to_string(),
            delivered: false,
        })
        .await
        .unwrap();

        let delivered = repo.steering_since(agent_id, t0).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].steering_type, "confused");
    }

    #[tokio::test]
    async fn test_diagnostic_run_lifecycle() {
        let (repo, _) = setup().await;
        let pool_wf = Workflow::new_for_test();
        repo_create_workflow(&repo.pool, &pool_wf).await;

        let mut run = DiagnosticRun::new(pool_wf.id, 4, 2, 2, 120);
        repo.create_diagnostic_run(&run).await.unwrap();

        run.status = DiagnosticStatus::Running;
        run.tasks_created_count = 2;
        run.tasks_created_ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        repo.update_diagnostic_run(&run).await.unwrap();

        let latest = repo.latest_diagnostic_run(pool_wf.id).await.unwrap().unwrap();
        assert_eq!(latest.status, DiagnosticStatus::Running);
        assert_eq!(latest.tasks_created_ids.len(), 2);
    }

    // Local helpers keeping the test focused on the monitoring repo.
    struct Workflow {
        id: Uuid,
    }
    impl Workflow {
        fn new_for_test() -> Self {
            Self { id: Uuid::new_v4() }
        }
    }

    async fn repo_create_workflow(pool: &sqlx::SqlitePool, wf: &Workflow) {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO workflows (id, name, status, result_found, created_at, updated_at)
             VALUES (?, 'wf', 'active', 0, ?, ?)",
        )
        .bind(wf.id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }
}
