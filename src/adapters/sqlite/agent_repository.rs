//! SQLite implementation of the AgentRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentLog, AgentStatus, AgentType, LogKind};
use crate::domain::ports::AgentRepository;

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn create(&self, agent: &Agent) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO agents (id, created_at, system_prompt, status, cli_type, session_name,
               current_task_id, last_activity, health_check_failures, agent_type,
               kept_alive_for_validation)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(agent.id.to_string())
        .bind(agent.created_at.to_rfc3339())
        .bind(&agent.system_prompt)
        .bind(agent.status.as_str())
        .bind(&agent.cli_type)
        .bind(&agent.session_name)
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(agent.last_activity.map(|t| t.to_rfc3339()))
        .bind(agent.health_check_failures)
        .bind(agent.agent_type.as_str())
        .bind(agent.kept_alive_for_validation)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, agent: &Agent) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE agents SET status = ?, session_name = ?, current_task_id = ?,
               last_activity = ?, health_check_failures = ?, agent_type = ?,
               kept_alive_for_validation = ?
               WHERE id = ?"#,
        )
        .bind(agent.status.as_str())
        .bind(&agent.session_name)
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(agent.last_activity.map(|t| t.to_rfc3339()))
        .bind(agent.health_check_failures)
        .bind(agent.agent_type.as_str())
        .bind(agent.kept_alive_for_validation)
        .bind(agent.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent.id));
        }
        Ok(())
    }

    async fn list_active(&self) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE status != 'terminated' ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_active(&self) -> DomainResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM agents WHERE status != 'terminated'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_by_status(&self, status: AgentStatus) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> =
            sqlx::query_as("SELECT * FROM agents WHERE status = ? ORDER BY created_at")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_terminated_for_tasks(
        &self,
        task_ids: &[Uuid],
        limit: usize,
    ) -> DomainResult<Vec<Agent>> {
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; task_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM agents WHERE status = 'terminated' AND current_task_id IN ({placeholders})
             ORDER BY created_at DESC LIMIT ?"
        );
        let mut q = sqlx::query_as::<_, AgentRow>(&sql);
        for id in task_ids {
            q = q.bind(id.to_string());
        }
        let rows: Vec<AgentRow> = q.bind(limit as i64).fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn append_log(&self, log: &AgentLog) -> DomainResult<i64> {
        let details_json = super::to_json_opt(&log.details)?;
        let result = sqlx::query(
            r#"INSERT INTO agent_logs (agent_id, log_type, message, details, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(log.agent_id.map(|id| id.to_string()))
        .bind(log.log_type.as_str())
        .bind(&log.message)
        .bind(details_json)
        .bind(log.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn logs_for_agent(
        &self,
        agent_id: Uuid,
        kinds: &[LogKind],
    ) -> DomainResult<Vec<AgentLog>> {
        let rows: Vec<AgentLogRow> = if kinds.is_empty() {
            sqlx::query_as("SELECT * FROM agent_logs WHERE agent_id = ? ORDER BY created_at, id")
                .bind(agent_id.to_string())
                .fetch_all(&self.pool)
                .await?
        } else {
            let placeholders = vec!["?"; kinds.len()].join(", ");
            let sql = format!(
                "SELECT * FROM agent_logs WHERE agent_id = ? AND log_type IN ({placeholders})
                 ORDER BY created_at, id"
            );
            let mut q = sqlx::query_as::<_, AgentLogRow>(&sql).bind(agent_id.to_string());
            for kind in kinds {
                q = q.bind(kind.as_str());
            }
            q.fetch_all(&self.pool).await?
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn latest_log_of_kind(
        &self,
        agent_id: Uuid,
        kind: LogKind,
    ) -> DomainResult<Option<AgentLog>> {
        let row: Option<AgentLogRow> = sqlx::query_as(
            r#"SELECT * FROM agent_logs WHERE agent_id = ? AND log_type = ?
               ORDER BY created_at DESC, id DESC LIMIT 1"#,
        )
        .bind(agent_id.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    created_at: String,
    system_prompt: String,
    status: String,
    cli_type: String,
    session_name: Option<String>,
    current_task_id: Option<String>,
    last_activity: Option<String>,
    health_check_failures: i32,
    agent_type: String,
    kept_alive_for_validation: bool,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let status = AgentStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid status: {}", row.status)))?;
        let agent_type = AgentType::from_str(&row.agent_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid agent_type: {}", row.agent_type))
        })?;

        Ok(Agent {
            id: super::parse_uuid(&row.id)?,
            system_prompt: row.system_prompt,
            status,
            cli_type: row.cli_type,
            session_name: row.session_name,
            current_task_id: super::parse_optional_uuid(row.current_task_id)?,
            last_activity: super::parse_optional_datetime(row.last_activity)?,
            health_check_failures: row.health_check_failures,
            agent_type,
            kept_alive_for_validation: row.kept_alive_for_validation,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AgentLogRow {
    id: i64,
    agent_id: Option<String>,
    log_type: String,
    message: Option<String>,
    details: Option<String>,
    created_at: String,
}

impl TryFrom<AgentLogRow> for AgentLog {
    type Error = DomainError;

    fn try_from(row: AgentLogRow) -> Result<Self, Self::Error> {
        let log_type = LogKind::from_str(&row.log_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid log_type: {}", row.log_type))
        })?;
        let details = row
            .details
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(AgentLog {
            id: Some(row.id),
            agent_id: super::parse_optional_uuid(row.agent_id)?,
            log_type,
            message: row.message.unwrap_or_default(),
            details,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_repo() -> SqliteAgentRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAgentRepository::new(pool)
    }

    fn working_agent() -> Agent {
        let mut agent = Agent::new("prompt", "claude", AgentType::Phase, Uuid::new_v4());
        agent.session_name = Some(Agent::session_name_for("agent-", agent.id));
        agent
    }

    #[tokio::test]
    async fn test_create_and_count_active() {
        let repo = setup_test_repo().await;
        let agent = working_agent();
        repo.create(&agent).await.unwrap();

        assert_eq!(repo.count_active().await.unwrap(), 1);

        let mut terminated = repo.get(agent.id).await.unwrap().unwrap();
        terminated.status = AgentStatus::Terminated;
        repo.update(&terminated).await.unwrap();
        assert_eq!(repo.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_live_session_name_is_unique() {
        let repo = setup_test_repo().await;
        let agent = working_agent();
        repo.create(&agent).await.unwrap();

        let mut clash = working_agent();
        clash.session_name = agent.session_name.clone();
        assert!(repo.create(&clash).await.is_err());
    }

    #[tokio::test]
    async fn test_terminated_agent_frees_session_name() {
        let repo = setup_test_repo().await;
        let mut agent = working_agent();
        repo.create(&agent).await.unwrap();

        agent.status = AgentStatus::Terminated;
        repo.update(&agent).await.unwrap();

        let mut reuse = working_agent();
        reuse.session_name = agent.session_name.clone();
        repo.create(&reuse).await.unwrap();
    }

    #[tokio::test]
    async fn test_logs_ordering_and_filter() {
        let repo = setup_test_repo().await;
        let agent = working_agent();
        repo.create(&agent).await.unwrap();

        repo.append_log(&AgentLog::new(agent.id, LogKind::Input, "first"))
            .await
            .unwrap();
        repo.append_log(&AgentLog::new(agent.id, LogKind::Steering, "nudge"))
            .await
            .unwrap();
        repo.append_log(&AgentLog::new(agent.id, LogKind::Output, "second"))
            .await
            .unwrap();

        let all = repo.logs_for_agent(agent.id, &[]).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "first");

        let io = repo
            .logs_for_agent(agent.id, &[LogKind::Input, LogKind::Output])
            .await
            .unwrap();
        assert_eq!(io.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_log_of_kind() {
        let repo = setup_test_repo().await;
        let agent = working_agent();
        repo.create(&agent).await.unwrap();

        let log = AgentLog::new(agent.id, LogKind::Terminated, "gone").with_details(
            serde_json::json!({"final_output": "done", "output_lines": 1}),
        );
        repo.append_log(&log).await.unwrap();

        let latest = repo
            .latest_log_of_kind(agent.id, LogKind::Terminated)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.details.unwrap()["final_output"], "done");
    }
}
