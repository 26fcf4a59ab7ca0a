//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RelatedTask, Task, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

/// SQL fragment ordering queued tasks by the queue rule:
/// boost desc, priority desc, queued_at asc.
const QUEUE_ORDER_SQL: &str = "ORDER BY priority_boosted DESC,
        CASE priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 WHEN 'low' THEN 1 ELSE 2 END DESC,
        queued_at ASC";

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        task.validate().map_err(DomainError::InvalidArgument)?;
        let embedding_json = super::to_json_opt(&task.embedding)?;
        let related_json = serde_json::to_string(&task.related_tasks)?;

        sqlx::query(
            r#"INSERT INTO tasks (id, created_at, updated_at, raw_description, enriched_description,
               done_definition, status, priority, assigned_agent_id, created_by_agent_id,
               parent_task_id, phase_id, workflow_id, ticket_id, started_at, completed_at,
               completion_notes, failure_reason, estimated_complexity, validation_enabled,
               validation_iteration, last_validation_feedback, has_results, embedding,
               related_task_ids, duplicate_of_task_id, similarity_score, queued_at,
               queue_position, priority_boosted)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(&task.raw_description)
        .bind(&task.enriched_description)
        .bind(&task.done_definition)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.created_by_agent_id)
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.phase_id.map(|id| id.to_string()))
        .bind(task.workflow_id.map(|id| id.to_string()))
        .bind(task.ticket_id.map(|id| id.to_string()))
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(&task.completion_notes)
        .bind(&task.failure_reason)
        .bind(task.estimated_complexity)
        .bind(task.validation_enabled)
        .bind(task.validation_iteration)
        .bind(&task.last_validation_feedback)
        .bind(task.has_results)
        .bind(embedding_json)
        .bind(&related_json)
        .bind(task.duplicate_of_task_id.map(|id| id.to_string()))
        .bind(task.similarity_score)
        .bind(task.queued_at.map(|t| t.to_rfc3339()))
        .bind(task.queue_position)
        .bind(task.priority_boosted)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let embedding_json = super::to_json_opt(&task.embedding)?;
        let related_json = serde_json::to_string(&task.related_tasks)?;

        let result = sqlx::query(
            r#"UPDATE tasks SET updated_at = ?, raw_description = ?, enriched_description = ?,
               done_definition = ?, status = ?, priority = ?, assigned_agent_id = ?,
               created_by_agent_id = ?, parent_task_id = ?, phase_id = ?, workflow_id = ?,
               ticket_id = ?, started_at = ?, completed_at = ?, completion_notes = ?,
               failure_reason = ?, estimated_complexity = ?, validation_enabled = ?,
               validation_iteration = ?, last_validation_feedback = ?, has_results = ?,
               embedding = ?, related_task_ids = ?, duplicate_of_task_id = ?,
               similarity_score = ?, queued_at = ?, queue_position = ?, priority_boosted = ?
               WHERE id = ?"#,
        )
        .bind(task.updated_at.to_rfc3339())
        .bind(&task.raw_description)
        .bind(&task.enriched_description)
        .bind(&task.done_definition)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.created_by_agent_id)
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.phase_id.map(|id| id.to_string()))
        .bind(task.workflow_id.map(|id| id.to_string()))
        .bind(task.ticket_id.map(|id| id.to_string()))
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(&task.completion_notes)
        .bind(&task.failure_reason)
        .bind(task.estimated_complexity)
        .bind(task.validation_enabled)
        .bind(task.validation_iteration)
        .bind(&task.last_validation_feedback)
        .bind(task.has_results)
        .bind(embedding_json)
        .bind(&related_json)
        .bind(task.duplicate_of_task_id.map(|id| id.to_string()))
        .bind(task.similarity_score)
        .bind(task.queued_at.map(|t| t.to_rfc3339()))
        .bind(task.queue_position)
        .bind(task.priority_boosted)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id));
        }

        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(priority) = &filter.priority {
            query.push_str(" AND priority = ?");
            bindings.push(priority.as_str().to_string());
        }
        if let Some(workflow_id) = &filter.workflow_id {
            query.push_str(" AND workflow_id = ?");
            bindings.push(workflow_id.to_string());
        }
        if let Some(phase_id) = &filter.phase_id {
            query.push_str(" AND phase_id = ?");
            bindings.push(phase_id.to_string());
        }
        if let Some(ticket_id) = &filter.ticket_id {
            query.push_str(" AND ticket_id = ?");
            bindings.push(ticket_id.to_string());
        }

        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
        self.list(TaskFilter { status: Some(status), ..Default::default() })
            .await
    }

    async fn list_by_workflow(&self, workflow_id: Uuid) -> DomainResult<Vec<Task>> {
        self.list(TaskFilter { workflow_id: Some(workflow_id), ..Default::default() })
            .await
    }

    async fn list_queued(&self) -> DomainResult<Vec<Task>> {
        let sql = format!("SELECT * FROM tasks WHERE status = 'queued' {QUEUE_ORDER_SQL}");
        let rows: Vec<TaskRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_embedded_in_phase(&self, phase_id: Option<Uuid>) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = match phase_id {
            Some(pid) => {
                sqlx::query_as(
                    r#"SELECT * FROM tasks WHERE embedding IS NOT NULL
                       AND status NOT IN ('failed', 'duplicated') AND phase_id = ?"#,
                )
                .bind(pid.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"SELECT * FROM tasks WHERE embedding IS NOT NULL
                       AND status NOT IN ('failed', 'duplicated') AND phase_id IS NULL"#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_blocking_sync(&self) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT * FROM tasks WHERE ticket_id IS NOT NULL
               AND status IN ('pending', 'queued', 'blocked', 'assigned', 'in_progress')"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_ticket_status(
        &self,
        ticket_id: Uuid,
        status: TaskStatus,
    ) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE ticket_id = ? AND status = ?")
                .bind(ticket_id.to_string())
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_queue_positions(&self, positions: &[(Uuid, i64)]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;
        for (task_id, position) in positions {
            sqlx::query("UPDATE tasks SET queue_position = ? WHERE id = ? AND status = 'queued'")
                .bind(position)
                .bind(task_id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    created_at: String,
    updated_at: String,
    raw_description: String,
    enriched_description: Option<String>,
    done_definition: String,
    status: String,
    priority: String,
    assigned_agent_id: Option<String>,
    created_by_agent_id: Option<String>,
    parent_task_id: Option<String>,
    phase_id: Option<String>,
    workflow_id: Option<String>,
    ticket_id: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    completion_notes: Option<String>,
    failure_reason: Option<String>,
    estimated_complexity: Option<i32>,
    validation_enabled: bool,
    validation_iteration: i32,
    last_validation_feedback: Option<String>,
    has_results: bool,
    embedding: Option<String>,
    related_task_ids: Option<String>,
    duplicate_of_task_id: Option<String>,
    similarity_score: Option<f32>,
    queued_at: Option<String>,
    queue_position: Option<i64>,
    priority_boosted: bool,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let priority = TaskPriority::from_str(&row.priority).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid priority: {}", row.priority))
        })?;

        let embedding: Option<Vec<f32>> = row
            .embedding
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let related_tasks: Vec<RelatedTask> = super::parse_json_or_default(row.related_task_ids)?;

        Ok(Task {
            id: super::parse_uuid(&row.id)?,
            raw_description: row.raw_description,
            enriched_description: row.enriched_description,
            done_definition: row.done_definition,
            status,
            priority,
            assigned_agent_id: super::parse_optional_uuid(row.assigned_agent_id)?,
            created_by_agent_id: row.created_by_agent_id,
            parent_task_id: super::parse_optional_uuid(row.parent_task_id)?,
            phase_id: super::parse_optional_uuid(row.phase_id)?,
            workflow_id: super::parse_optional_uuid(row.workflow_id)?,
            ticket_id: super::parse_optional_uuid(row.ticket_id)?,
            started_at: super::parse_optional_datetime(row.started_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
            completion_notes: row.completion_notes,
            failure_reason: row.failure_reason,
            estimated_complexity: row.estimated_complexity,
            validation_enabled: row.validation_enabled,
            validation_iteration: row.validation_iteration,
            last_validation_feedback: row.last_validation_feedback,
            has_results: row.has_results,
            embedding,
            related_tasks,
            duplicate_of_task_id: super::parse_optional_uuid(row.duplicate_of_task_id)?,
            similarity_score: row.similarity_score,
            queued_at: super::parse_optional_datetime(row.queued_at)?,
            queue_position: row.queue_position,
            priority_boosted: row.priority_boosted,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Utc;

    async fn setup_test_repo() -> SqliteTaskRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteTaskRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let repo = setup_test_repo().await;
        let task = Task::new("Implement login", "returns 200");

        repo.create(&task).await.unwrap();

        let retrieved = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(retrieved.raw_description, "Implement login");
        assert_eq!(retrieved.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_missing_task_fails() {
        let repo = setup_test_repo().await;
        let task = Task::new("never stored", "d");
        let err = repo.update(&task).await.unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn test_queued_ordering() {
        let repo = setup_test_repo().await;

        let mut low = Task::new("low", "d").with_priority(TaskPriority::Low);
        low.status = TaskStatus::Queued;
        low.queued_at = Some(Utc::now() - chrono::Duration::seconds(30));

        let mut high = Task::new("high", "d").with_priority(TaskPriority::High);
        high.status = TaskStatus::Queued;
        high.queued_at = Some(Utc::now());

        let mut boosted = Task::new("boosted low", "d").with_priority(TaskPriority::Low);
        boosted.status = TaskStatus::Queued;
        boosted.queued_at = Some(Utc::now());
        boosted.priority_boosted = true;

        repo.create(&low).await.unwrap();
        repo.create(&high).await.unwrap();
        repo.create(&boosted).await.unwrap();

        let queued = repo.list_queued().await.unwrap();
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[0].id, boosted.id);
        assert_eq!(queued[1].id, high.id);
        assert_eq!(queued[2].id, low.id);
    }

    #[tokio::test]
    async fn test_embedded_in_phase_filters() {
        let repo = setup_test_repo().await;
        let phase_id = Uuid::new_v4();

        let mut in_phase = Task::new("a", "d");
        in_phase.phase_id = Some(phase_id);
        in_phase.embedding = Some(vec![0.1, 0.2]);

        let mut other_phase = Task::new("b", "d");
        other_phase.phase_id = Some(Uuid::new_v4());
        other_phase.embedding = Some(vec![0.1, 0.2]);

        let mut failed = Task::new("c", "d");
        failed.phase_id = Some(phase_id);
        failed.embedding = Some(vec![0.1, 0.2]);
        failed.force_status(TaskStatus::Failed, "test setup");

        repo.create(&in_phase).await.unwrap();
        repo.create(&other_phase).await.unwrap();
        repo.create(&failed).await.unwrap();

        let found = repo.list_embedded_in_phase(Some(phase_id)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, in_phase.id);
    }

    #[tokio::test]
    async fn test_embedding_round_trip() {
        let repo = setup_test_repo().await;
        let mut task = Task::new("a", "d");
        task.embedding = Some(vec![0.25, -0.5, 1.0]);
        task.related_tasks = vec![RelatedTask { id: Uuid::new_v4(), similarity: 0.72 }];
        repo.create(&task).await.unwrap();

        let retrieved = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(retrieved.embedding, task.embedding);
        assert_eq!(retrieved.related_tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_set_queue_positions() {
        let repo = setup_test_repo().await;
        let mut t1 = Task::new("a", "d");
        t1.status = TaskStatus::Queued;
        t1.queued_at = Some(Utc::now());
        repo.create(&t1).await.unwrap();

        repo.set_queue_positions(&[(t1.id, 1)]).await.unwrap();
        let got = repo.get(t1.id).await.unwrap().unwrap();
        assert_eq!(got.queue_position, Some(1));
    }
}
