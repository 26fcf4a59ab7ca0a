//! Task queueing and agent admission control.
//!
//! Tasks queue when the concurrent-agent cap is reached. Queue order is
//! strict lexicographic: boost desc, priority desc, queued_at asc.
//! `queue_position` is a derived 1-based rank recomputed on every mutation.

use chrono::Utc;
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::{AgentRepository, TaskRepository};
use crate::services::blocking_service::TaskBlockingService;

/// Admission decision for a new task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Capacity available; spawn an agent immediately
    RunNow,
    /// At capacity; enqueue
    Enqueue,
}

/// One entry of the queue status report.
#[derive(Debug, Clone)]
pub struct QueuedTaskInfo {
    pub task_id: Uuid,
    pub description: String,
    pub priority: String,
    pub priority_boosted: bool,
    pub queue_position: Option<i64>,
    pub queued_at: Option<chrono::DateTime<Utc>>,
}

/// Snapshot of queue and capacity state.
#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub active_agents: i64,
    pub max_concurrent_agents: usize,
    pub slots_available: usize,
    pub at_capacity: bool,
    pub queued_tasks: Vec<QueuedTaskInfo>,
}

/// Compare two tasks by the queue ordering rule.
///
/// Strict lexicographic: priority_boosted desc, priority desc, queued_at asc
/// (a missing queued_at sorts last).
pub fn queue_ordering(a: &Task, b: &Task) -> Ordering {
    b.priority_boosted
        .cmp(&a.priority_boosted)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| match (a.queued_at, b.queued_at) {
            (Some(at_a), Some(at_b)) => at_a.cmp(&at_b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Recompute 1-based queue positions for every queued task.
///
/// Best-effort: position is derived state, so a failure here leaves ordering
/// stale but never inconsistent.
pub async fn recalculate_queue_positions(task_repo: &dyn TaskRepository) -> DomainResult<()> {
    let mut queued = task_repo.list_queued().await?;
    queued.sort_by(queue_ordering);
    let positions: Vec<(Uuid, i64)> = queued
        .iter()
        .enumerate()
        .map(|(i, task)| (task.id, (i + 1) as i64))
        .collect();
    task_repo.set_queue_positions(&positions).await
}

/// Manages task queueing against the concurrent-agent limit.
pub struct QueueService {
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    blocking: Arc<TaskBlockingService>,
    max_concurrent_agents: usize,
}

impl QueueService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        blocking: Arc<TaskBlockingService>,
        max_concurrent_agents: usize,
    ) -> Self {
        tracing::info!(max_concurrent_agents, "QueueService initialized");
        Self { task_repo, agent_repo, blocking, max_concurrent_agents }
    }

    /// Count of agents that hold a concurrency slot.
    pub async fn active_agent_count(&self) -> DomainResult<i64> {
        self.agent_repo.count_active().await
    }

    /// Decide whether a new task runs immediately or queues.
    pub async fn admit(&self) -> DomainResult<Admission> {
        let active = self.active_agent_count().await?;
        if (active as usize) < self.max_concurrent_agents {
            Ok(Admission::RunNow)
        } else {
            Ok(Admission::Enqueue)
        }
    }

    /// Enqueue a task, or mark it blocked when its ticket has blockers.
    pub async fn enqueue(&self, task_id: Uuid) -> DomainResult<()> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for enqueueing");
            return Ok(());
        };

        if task.ticket_id.is_some() {
            let blocking = self.blocking.check(task_id).await?;
            if blocking.is_blocked {
                let reason = format!("Blocked by tickets: {}", blocking.blocker_titles.join(", "));
                self.blocking.block(task_id, Some(reason)).await?;
                tracing::info!(
                    %task_id,
                    blockers = ?blocking.blocking_ticket_ids,
                    "Task marked blocked instead of queued"
                );
                return Ok(());
            }
        }

        task.force_status(TaskStatus::Queued, "enqueue");
        task.queued_at = Some(Utc::now());
        self.task_repo.update(&task).await?;

        recalculate_queue_positions(self.task_repo.as_ref()).await?;

        let position = self
            .task_repo
            .get(task_id)
            .await?
            .and_then(|t| t.queue_position);
        tracing::info!(%task_id, ?position, "Task queued");
        Ok(())
    }

    /// The next runnable queued task, without mutating anything.
    ///
    /// Queued tasks whose ticket turns out to be blocked are skipped (and
    /// flagged; the sync reconciler repairs them).
    pub async fn next(&self) -> DomainResult<Option<Task>> {
        let queued = self.task_repo.list_queued().await?;
        for task in queued {
            if task.ticket_id.is_some() {
                let blocking = self.blocking.check(task.id).await?;
                if blocking.is_blocked {
                    tracing::warn!(
                        task_id = %task.id,
                        blockers = ?blocking.blocking_ticket_ids,
                        "Queued task has a blocked ticket; it should be status=blocked. Skipping"
                    );
                    continue;
                }
            }
            return Ok(Some(task));
        }
        Ok(None)
    }

    /// Transition queued → assigned, clear the position, re-rank the rest.
    pub async fn dequeue(&self, task_id: Uuid) -> DomainResult<()> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for dequeueing");
            return Ok(());
        };
        if task.status != TaskStatus::Queued {
            tracing::warn!(%task_id, status = task.status.as_str(), "Task is not queued");
            return Ok(());
        }

        task.transition_to(TaskStatus::Assigned)
            .map_err(|reason| DomainError::InvalidStateTransition {
                from: "queued".to_string(),
                to: "assigned".to_string(),
                reason,
            })?;
        task.queue_position = None;
        self.task_repo.update(&task).await?;

        recalculate_queue_positions(self.task_repo.as_ref()).await?;
        tracing::info!(%task_id, "Task dequeued and assigned");
        Ok(())
    }

    /// Boost a queued task to the front regardless of priority.
    pub async fn boost(&self, task_id: Uuid) -> DomainResult<bool> {
        let Some(mut task) = self.task_repo.get(task_id).await? else {
            tracing::error!(%task_id, "Task not found for priority boost");
            return Ok(false);
        };
        if task.status != TaskStatus::Queued {
            tracing::warn!(%task_id, status = task.status.as_str(), "Cannot boost: not queued");
            return Ok(false);
        }

        task.priority_boosted = true;
        task.updated_at = Utc::now();
        self.task_repo.update(&task).await?;

        recalculate_queue_positions(self.task_repo.as_ref()).await?;
        tracing::info!(%task_id, "Task priority boosted");
        Ok(true)
    }

    /// Queue and capacity snapshot for status displays.
    pub async fn status(&self) -> DomainResult<QueueStatus> {
        let active = self.active_agent_count().await?;
        let queued = self.task_repo.list_queued().await?;

        let queued_tasks = queued
            .iter()
            .map(|task| QueuedTaskInfo {
                task_id: task.id,
                description: task.description().to_string(),
                priority: task.priority.as_str().to_string(),
                priority_boosted: task.priority_boosted,
                queue_position: task.queue_position,
                queued_at: task.queued_at,
            })
            .collect();

        let slots = self.max_concurrent_agents.saturating_sub(active as usize);
        Ok(QueueStatus {
            active_agents: active,
            max_concurrent_agents: self.max_concurrent_agents,
            slots_available: slots,
            at_capacity: active as usize >= self.max_concurrent_agents,
            queued_tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteTaskRepository,
        SqliteTicketRepository,
    };
    use crate::domain::models::{Agent, AgentStatus, AgentType, TaskPriority};

    async fn setup(max: usize) -> (QueueService, Arc<SqliteTaskRepository>, Arc<SqliteAgentRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let task_repo = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let agent_repo = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let ticket_repo = Arc::new(SqliteTicketRepository::new(pool));
        let blocking = Arc::new(TaskBlockingService::new(task_repo.clone(), ticket_repo));
        let service = QueueService::new(task_repo.clone(), agent_repo.clone(), blocking, max);
        (service, task_repo, agent_repo)
    }

    #[tokio::test]
    async fn test_admission_against_cap() {
        let (service, _tasks, agents) = setup(1).await;
        assert_eq!(service.admit().await.unwrap(), Admission::RunNow);

        let agent = Agent::new("p", "claude", AgentType::Phase, Uuid::new_v4());
        agents.create(&agent).await.unwrap();
        assert_eq!(service.admit().await.unwrap(), Admission::Enqueue);

        let mut done = agent;
        done.status = AgentStatus::Terminated;
        agents.update(&done).await.unwrap();
        assert_eq!(service.admit().await.unwrap(), Admission::RunNow);
    }

    #[tokio::test]
    async fn test_queue_ordering_and_positions() {
        let (service, tasks, _) = setup(0).await;

        let medium = Task::new("medium", "d");
        let high = Task::new("high", "d").with_priority(TaskPriority::High);
        let low = Task::new("low", "d").with_priority(TaskPriority::Low);
        for t in [&medium, &high, &low] {
            tasks.create(t).await.unwrap();
        }

        service.enqueue(medium.id).await.unwrap();
        service.enqueue(high.id).await.unwrap();
        service.enqueue(low.id).await.unwrap();

        let queued = tasks.list_queued().await.unwrap();
        assert_eq!(
            queued.iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![high.id, medium.id, low.id]
        );
        assert_eq!(
            queued.iter().map(|t| t.queue_position).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );
    }

    #[tokio::test]
    async fn test_boost_jumps_queue() {
        let (service, tasks, _) = setup(0).await;

        let high = Task::new("high", "d").with_priority(TaskPriority::High);
        let low = Task::new("low", "d").with_priority(TaskPriority::Low);
        tasks.create(&high).await.unwrap();
        tasks.create(&low).await.unwrap();
        service.enqueue(high.id).await.unwrap();
        service.enqueue(low.id).await.unwrap();

        assert!(service.boost(low.id).await.unwrap());

        let next = service.next().await.unwrap().unwrap();
        assert_eq!(next.id, low.id);
        assert_eq!(next.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_dequeue_clears_position_and_reranks() {
        let (service, tasks, _) = setup(0).await;

        let a = Task::new("a", "d");
        let b = Task::new("b", "d");
        tasks.create(&a).await.unwrap();
        tasks.create(&b).await.unwrap();
        service.enqueue(a.id).await.unwrap();
        service.enqueue(b.id).await.unwrap();

        service.dequeue(a.id).await.unwrap();

        let a_after = tasks.get(a.id).await.unwrap().unwrap();
        assert_eq!(a_after.status, TaskStatus::Assigned);
        assert!(a_after.queue_position.is_none());

        let b_after = tasks.get(b.id).await.unwrap().unwrap();
        assert_eq!(b_after.queue_position, Some(1));
    }

    #[tokio::test]
    async fn test_boost_non_queued_task_refused() {
        let (service, tasks, _) = setup(0).await;
        let t = Task::new("pending", "d");
        tasks.create(&t).await.unwrap();
        assert!(!service.boost(t.id).await.unwrap());
    }

    mod properties {
        use super::*;
        use chrono::TimeZone;
        use proptest::prelude::*;

        fn arb_task() -> impl Strategy<Value = Task> {
            (any::<bool>(), 0u8..3, 0i64..100_000).prop_map(|(boosted, priority, offset)| {
                let mut task = Task::new("t", "d");
                task.priority = match priority {
                    0 => TaskPriority::Low,
                    1 => TaskPriority::Medium,
                    _ => TaskPriority::High,
                };
                task.priority_boosted = boosted;
                task.queued_at = Utc.timestamp_opt(1_700_000_000 + offset, 0).single();
                task
            })
        }

        proptest! {
            #[test]
            fn ordering_is_strict_lexicographic(
                mut tasks in proptest::collection::vec(arb_task(), 1..50),
            ) {
                tasks.sort_by(queue_ordering);
                for pair in tasks.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    prop_assert!(a.priority_boosted >= b.priority_boosted);
                    if a.priority_boosted == b.priority_boosted {
                        prop_assert!(a.priority >= b.priority);
                        if a.priority == b.priority {
                            prop_assert!(a.queued_at <= b.queued_at);
                        }
                    }
                }
            }

            #[test]
            fn ordering_is_stable_under_resort(
                mut tasks in proptest::collection::vec(arb_task(), 1..50),
            ) {
                tasks.sort_by(queue_ordering);
                let first_pass: Vec<_> = tasks.iter().map(|t| t.id).collect();
                tasks.sort_by(queue_ordering);
                let second_pass: Vec<_> = tasks.iter().map(|t| t.id).collect();
                prop_assert_eq!(first_pass, second_pass);
            }
        }
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let (service, tasks, _) = setup(2).await;
        let t = Task::new("queued", "d");
        tasks.create(&t).await.unwrap();
        service.enqueue(t.id).await.unwrap();

        let status = service.status().await.unwrap();
        assert_eq!(status.active_agents, 0);
        assert_eq!(status.slots_available, 2);
        assert!(!status.at_capacity);
        assert_eq!(status.queued_tasks.len(), 1);
    }
}
