//! SQLite implementation of the WorkflowRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Phase, PhaseStatus, PhaseValidation, ResultStatus, ValidationReview, Workflow, WorkflowResult,
    WorkflowStatus,
};
use crate::domain::ports::WorkflowRepository;

#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_workflow(&self, workflow: &Workflow) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workflows (id, name, goal, status, result_found, result_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.goal)
        .bind(workflow.status.as_str())
        .bind(workflow.result_found)
        .bind(workflow.result_id.map(|id| id.to_string()))
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> DomainResult<Option<Workflow>> {
        let row: Option<WorkflowRow> = sqlx::query_as("SELECT * FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_workflow(&self, workflow: &Workflow) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE workflows SET name = ?, goal = ?, status = ?, result_found = ?,
               result_id = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&workflow.name)
        .bind(&workflow.goal)
        .bind(workflow.status.as_str())
        .bind(workflow.result_found)
        .bind(workflow.result_id.map(|id| id.to_string()))
        .bind(workflow.updated_at.to_rfc3339())
        .bind(workflow.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::WorkflowNotFound(workflow.id));
        }
        Ok(())
    }

    async fn list_active_workflows(&self) -> DomainResult<Vec<Workflow>> {
        let rows: Vec<WorkflowRow> =
            sqlx::query_as("SELECT * FROM workflows WHERE status = 'active' ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_phase(&self, phase: &Phase) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO phases (id, workflow_id, seq, name, description, done_definitions,
               additional_notes, outputs, next_steps, working_directory, validation, status,
               completed_at, completion_summary)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(phase.id.to_string())
        .bind(phase.workflow_id.to_string())
        .bind(phase.seq)
        .bind(&phase.name)
        .bind(&phase.description)
        .bind(serde_json::to_string(&phase.done_definitions)?)
        .bind(&phase.additional_notes)
        .bind(&phase.outputs)
        .bind(&phase.next_steps)
        .bind(&phase.working_directory)
        .bind(super::to_json_opt(&phase.validation)?)
        .bind(phase.status.as_str())
        .bind(phase.completed_at.map(|t| t.to_rfc3339()))
        .bind(&phase.completion_summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_phase(&self, id: Uuid) -> DomainResult<Option<Phase>> {
        let row: Option<PhaseRow> = sqlx::query_as("SELECT * FROM phases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_phase(&self, phase: &Phase) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE phases SET name = ?, description = ?, done_definitions = ?,
               additional_notes = ?, outputs = ?, next_steps = ?, working_directory = ?,
               validation = ?, status = ?, completed_at = ?, completion_summary = ?
               WHERE id = ?"#,
        )
        .bind(&phase.name)
        .bind(&phase.description)
        .bind(serde_json::to_string(&phase.done_definitions)?)
        .bind(&phase.additional_notes)
        .bind(&phase.outputs)
        .bind(&phase.next_steps)
        .bind(&phase.working_directory)
        .bind(super::to_json_opt(&phase.validation)?)
        .bind(phase.status.as_str())
        .bind(phase.completed_at.map(|t| t.to_rfc3339()))
        .bind(&phase.completion_summary)
        .bind(phase.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::InvalidArgument(format!("Phase not found: {}", phase.id)));
        }
        Ok(())
    }

    async fn list_phases(&self, workflow_id: Uuid) -> DomainResult<Vec<Phase>> {
        let rows: Vec<PhaseRow> =
            sqlx::query_as("SELECT * FROM phases WHERE workflow_id = ? ORDER BY seq")
                .bind(workflow_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_result(&self, result: &WorkflowResult) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO workflow_results (id, workflow_id, agent_id, result_file_path,
               result_content, status, validation_feedback, validated_by_agent_id, created_at,
               validated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.workflow_id.to_string())
        .bind(result.agent_id.to_string())
        .bind(&result.result_file_path)
        .bind(&result.result_content)
        .bind(result.status.as_str())
        .bind(&result.validation_feedback)
        .bind(result.validated_by_agent_id.map(|id| id.to_string()))
        .bind(result.created_at.to_rfc3339())
        .bind(result.validated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(&self, id: Uuid) -> DomainResult<Option<WorkflowResult>> {
        let row: Option<ResultRow> = sqlx::query_as("SELECT * FROM workflow_results WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_result(&self, result: &WorkflowResult) -> DomainResult<()> {
        let updated = sqlx::query(
            r#"UPDATE workflow_results SET status = ?, validation_feedback = ?,
               validated_by_agent_id = ?, validated_at = ? WHERE id = ?"#,
        )
        .bind(result.status.as_str())
        .bind(&result.validation_feedback)
        .bind(result.validated_by_agent_id.map(|id| id.to_string()))
        .bind(result.validated_at.map(|t| t.to_rfc3339()))
        .bind(result.id.to_string())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DomainError::InvalidArgument(format!(
                "Workflow result not found: {}",
                result.id
            )));
        }
        Ok(())
    }

    async fn list_results(
        &self,
        workflow_id: Uuid,
        status: Option<&str>,
    ) -> DomainResult<Vec<WorkflowResult>> {
        let rows: Vec<ResultRow> = match status {
            Some(s) => sqlx::query_as(
                "SELECT * FROM workflow_results WHERE workflow_id = ? AND status = ? ORDER BY created_at DESC",
            )
            .bind(workflow_id.to_string())
            .bind(s)
            .fetch_all(&self.pool)
            .await?,
            None => sqlx::query_as(
                "SELECT * FROM workflow_results WHERE workflow_id = ? ORDER BY created_at DESC",
            )
            .bind(workflow_id.to_string())
            .fetch_all(&self.pool)
            .await?,
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_validation_review(&self, review: &ValidationReview) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO validation_reviews (id, task_id, validator_agent_id, iteration_number,
               validation_passed, feedback, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(review.id.to_string())
        .bind(review.task_id.to_string())
        .bind(review.validator_agent_id.to_string())
        .bind(review.iteration_number)
        .bind(review.validation_passed)
        .bind(&review.feedback)
        .bind(review.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_validation_reviews(&self, task_id: Uuid) -> DomainResult<Vec<ValidationReview>> {
        let rows: Vec<ReviewRow> = sqlx::query_as(
            "SELECT * FROM validation_reviews WHERE task_id = ? ORDER BY iteration_number",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowRow {
    id: String,
    name: String,
    goal: Option<String>,
    status: String,
    result_found: bool,
    result_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = DomainError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let status = WorkflowStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        Ok(Workflow {
            id: super::parse_uuid(&row.id)?,
            name: row.name,
            goal: row.goal,
            status,
            result_found: row.result_found,
            result_id: super::parse_optional_uuid(row.result_id)?,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRow {
    id: String,
    workflow_id: String,
    seq: i64,
    name: String,
    description: String,
    done_definitions: String,
    additional_notes: Option<String>,
    outputs: Option<String>,
    next_steps: Option<String>,
    working_directory: Option<String>,
    validation: Option<String>,
    status: String,
    completed_at: Option<String>,
    completion_summary: Option<String>,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = DomainError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        let status = PhaseStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let validation: Option<PhaseValidation> = row
            .validation
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(Phase {
            id: super::parse_uuid(&row.id)?,
            workflow_id: super::parse_uuid(&row.workflow_id)?,
            seq: row.seq,
            name: row.name,
            description: row.description,
            done_definitions: serde_json::from_str(&row.done_definitions)?,
            additional_notes: row.additional_notes,
            outputs: row.outputs,
            next_steps: row.next_steps,
            working_directory: row.working_directory,
            validation,
            status,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
            completion_summary: row.completion_summary,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    workflow_id: String,
    agent_id: String,
    result_file_path: String,
    result_content: String,
    status: String,
    validation_feedback: Option<String>,
    validated_by_agent_id: Option<String>,
    created_at: String,
    validated_at: Option<String>,
}

impl TryFrom<ResultRow> for WorkflowResult {
    type Error = DomainError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let status = ResultStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        Ok(WorkflowResult {
            id: super::parse_uuid(&row.id)?,
            workflow_id: super::parse_uuid(&row.workflow_id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            result_file_path: row.result_file_path,
            result_content: row.result_content,
            status,
            validation_feedback: row.validation_feedback,
            validated_by_agent_id: super::parse_optional_uuid(row.validated_by_agent_id)?,
            created_at: super::parse_datetime(&row.created_at)?,
            validated_at: super::parse_optional_datetime(row.validated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    task_id: String,
    validator_agent_id: String,
    iteration_number: i32,
    validation_passed: bool,
    feedback: String,
    created_at: String,
}

impl TryFrom<ReviewRow> for ValidationReview {
    type Error = DomainError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(ValidationReview {
            id: super::parse_uuid(&row.id)?,
            task_id: super::parse_uuid(&row.task_id)?,
            validator_agent_id: super::parse_uuid(&row.validator_agent_id)?,
            iteration_number: row.iteration_number,
            validation_passed: row.validation_passed,
            feedback: row.feedback,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::ports::AgentRepository;

    async fn setup() -> SqliteWorkflowRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteWorkflowRepository::new(pool)
    }

    #[tokio::test]
    async fn test_workflow_round_trip() {
        let repo = setup().await;
        let wf = Workflow::new("build auth", Some("working login".to_string()));
        repo.create_workflow(&wf).await.unwrap();

        let active = repo.list_active_workflows().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].goal.as_deref(), Some("working login"));
    }

    #[tokio::test]
    async fn test_phases_ordered_by_seq() {
        let repo = setup().await;
        let wf = Workflow::new("wf", None);
        repo.create_workflow(&wf).await.unwrap();

        let p2 = Phase::new(wf.id, 2, "build", "build it", vec![]);
        let p1 = Phase::new(wf.id, 1, "research", "study it", vec!["notes".to_string()]);
        repo.create_phase(&p2).await.unwrap();
        repo.create_phase(&p1).await.unwrap();

        let phases = repo.list_phases(wf.id).await.unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0].name, "research");
        assert_eq!(phases[1].name, "build");
    }

    #[tokio::test]
    async fn test_duplicate_seq_rejected() {
        let repo = setup().await;
        let wf = Workflow::new("wf", None);
        repo.create_workflow(&wf).await.unwrap();

        repo.create_phase(&Phase::new(wf.id, 1, "a", "d", vec![])).await.unwrap();
        assert!(repo.create_phase(&Phase::new(wf.id, 1, "b", "d", vec![])).await.is_err());
    }

    #[tokio::test]
    async fn test_results_lifecycle() {
        let repo = setup().await;
        let wf = Workflow::new("wf", None);
        repo.create_workflow(&wf).await.unwrap();

        let agent_pool = repo.pool.clone();
        let agent = crate::domain::models::Agent::new(
            "p",
            "claude",
            crate::domain::models::AgentType::Phase,
            Uuid::new_v4(),
        );
        crate::adapters::sqlite::SqliteAgentRepository::new(agent_pool)
            .create(&agent)
            .await
            .unwrap();

        let mut result = WorkflowResult::new(wf.id, agent.id, "/tmp/result.md", "# Result");
        repo.create_result(&result).await.unwrap();

        let pending = repo.list_results(wf.id, Some("pending_validation")).await.unwrap();
        assert_eq!(pending.len(), 1);

        result.status = ResultStatus::Validated;
        result.validated_at = Some(chrono::Utc::now());
        repo.update_result(&result).await.unwrap();

        assert!(repo.list_results(wf.id, Some("pending_validation")).await.unwrap().is_empty());
        assert_eq!(repo.list_results(wf.id, Some("validated")).await.unwrap().len(), 1);
    }
}
