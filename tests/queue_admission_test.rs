//! Queue admission and happy-path scenarios: a single task runs end to end,
//! and tasks beyond the agent cap queue in priority order with boost.

mod common;

use hephaestus::domain::models::{AgentStatus, TaskPriority, TaskStatus};
use hephaestus::domain::ports::{AgentRepository, SessionHost, TaskRepository};
use hephaestus::services::NewTask;
use uuid::Uuid;

fn new_task(description: &str, priority: TaskPriority) -> NewTask {
    NewTask {
        description: description.to_string(),
        done_definition: "it works".to_string(),
        priority,
        ticket_id: None,
        phase_id: None,
        parent_task_id: None,
        created_by: Some("main-session-cli".to_string()),
        validation_enabled: Some(false),
    }
}

#[tokio::test]
async fn happy_path_single_task() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 2).await;

    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("add login endpoint", TaskPriority::Medium))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Spawned);

    // Enriched, assigned, agent alive in its own worktree session.
    let task = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert!(task.is_enriched());
    let agent_id = task.assigned_agent_id.unwrap();

    let agent = fx.app.agent_repo.get(agent_id).await.unwrap().unwrap();
    let session = agent.session_name.clone().unwrap();
    assert!(fx.host.has(&session).await.unwrap());

    let worktree = fx.app.worktree_manager.get(agent_id).await.unwrap().unwrap();
    assert_eq!(fx.host.session_cwd(&session).await.unwrap(), worktree.path);

    // Agent reports done: merge (no-op), terminate, queue processed.
    fx.app
        .task_service
        .update_task_status(task.id, agent_id, true, Some("done".to_string()), None)
        .await
        .unwrap();

    let task = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let agent = fx.app.agent_repo.get(agent_id).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Terminated);
    assert_eq!(fx.app.agent_repo.count_active().await.unwrap(), 0);
}

#[tokio::test]
async fn queue_admission_with_boost() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 1).await;

    let (t1, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("first task", TaskPriority::Medium))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Spawned);

    let (t2, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("second task high", TaskPriority::High))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Queued);

    let (t3, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("third task low", TaskPriority::Low))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Queued);

    // Queue order: high before low.
    let order: Vec<Uuid> = fx
        .app
        .task_repo
        .list_queued()
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![t2.id, t3.id]);

    // Boost the low task to the front.
    assert!(fx.app.queue.boost(t3.id).await.unwrap());
    let order: Vec<Uuid> = fx
        .app
        .task_repo
        .list_queued()
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![t3.id, t2.id]);

    // Completing the running task frees the slot: the boosted task starts.
    let t1_agent = fx
        .app
        .task_repo
        .get(t1.id)
        .await
        .unwrap()
        .unwrap()
        .assigned_agent_id
        .unwrap();
    fx.app
        .task_service
        .update_task_status(t1.id, t1_agent, true, None, None)
        .await
        .unwrap();

    let t3_after = fx.app.task_repo.get(t3.id).await.unwrap().unwrap();
    assert_eq!(t3_after.status, TaskStatus::Assigned);
    assert!(t3_after.assigned_agent_id.is_some());
    assert!(t3_after.queue_position.is_none());

    let t2_after = fx.app.task_repo.get(t2.id).await.unwrap().unwrap();
    assert_eq!(t2_after.status, TaskStatus::Queued);
    assert_eq!(t2_after.queue_position, Some(1));
}

#[tokio::test]
async fn bump_bypasses_agent_cap() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 1).await;

    fx.app
        .task_service
        .create_and_process(new_task("running", TaskPriority::Medium))
        .await
        .unwrap();
    let (queued, _) = fx
        .app
        .task_service
        .create_and_process(new_task("urgent", TaskPriority::Medium))
        .await
        .unwrap();

    let agent = fx.app.task_service.bump_priority(queued.id).await.unwrap();

    // Transiently over the cap until natural completion.
    assert_eq!(fx.app.agent_repo.count_active().await.unwrap(), 2);
    let bumped = fx.app.task_repo.get(queued.id).await.unwrap().unwrap();
    assert_eq!(bumped.status, TaskStatus::Assigned);
    assert_eq!(bumped.assigned_agent_id, Some(agent.id));
    assert!(bumped.priority_boosted);
}

#[tokio::test]
async fn cancel_and_restart_round_trip() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 0).await;

    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("cancel me", TaskPriority::Medium))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Queued);

    fx.app.task_service.cancel_queued(task.id).await.unwrap();
    let cancelled = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TaskStatus::Failed);
    assert!(cancelled.failure_reason.unwrap().contains("Cancelled"));

    // Restart re-enters the pipeline without re-enriching.
    let enriched_before = cancelled.enriched_description.clone();
    let outcome = fx.app.task_service.restart(task.id).await.unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Queued);

    let restarted = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(restarted.status, TaskStatus::Queued);
    assert_eq!(restarted.enriched_description, enriched_before);
    assert!(restarted.failure_reason.is_none());
}

#[tokio::test]
async fn enrichment_failure_fails_task() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 1).await;
    fx.llm.set_fail_enrichment(true);

    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(new_task("doomed", TaskPriority::Medium))
        .await
        .unwrap();
    assert_eq!(outcome, hephaestus::services::PipelineOutcome::Failed);

    let task = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.failure_reason.unwrap().contains("Enrichment failed"));
}
