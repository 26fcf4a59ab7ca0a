//! Ticket ↔ task blocking: a task linked to a blocked ticket never runs,
//! and resolving the blocker cascades into the task starting.

mod common;

use hephaestus::domain::models::{BoardConfig, TaskPriority, TaskStatus, TicketPriority, Workflow};
use hephaestus::domain::ports::{TaskRepository, TicketRepository, WorkflowRepository};
use hephaestus::services::{NewTask, NewTicket, PipelineOutcome};
use uuid::Uuid;

async fn workflow_with_board(fx: &common::TestApp) -> Uuid {
    let workflow = Workflow::new("wf", None);
    fx.app.workflow_repo.create_workflow(&workflow).await.unwrap();
    fx.app
        .ticket_repo
        .save_board_config(&BoardConfig::default_for_workflow(workflow.id, "board"))
        .await
        .unwrap();
    workflow.id
}

fn ticket(workflow_id: Uuid, title: &str, blocked_by: Vec<Uuid>) -> NewTicket {
    NewTicket {
        workflow_id,
        agent_id: "main-session-cli".to_string(),
        title: title.to_string(),
        description: "details".to_string(),
        ticket_type: "task".to_string(),
        priority: TicketPriority::Medium,
        initial_status: None,
        parent_ticket_id: None,
        blocked_by_ticket_ids: blocked_by,
        tags: vec![],
    }
}

#[tokio::test]
async fn blocked_ticket_blocks_task_until_resolution() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 1).await;
    let workflow_id = workflow_with_board(&fx).await;

    let ticket_y = fx
        .app
        .ticket_service
        .create(ticket(workflow_id, "prepare schema", vec![]))
        .await
        .unwrap();
    let ticket_x = fx
        .app
        .ticket_service
        .create(ticket(workflow_id, "build endpoint", vec![ticket_y.id]))
        .await
        .unwrap();

    // Task linked to the blocked ticket: no agent, no enrichment spend.
    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(NewTask {
            description: "build the endpoint".to_string(),
            done_definition: "endpoint responds".to_string(),
            priority: TaskPriority::Medium,
            ticket_id: Some(ticket_x.id),
            phase_id: None,
            parent_task_id: None,
            created_by: Some("main-session-cli".to_string()),
            validation_enabled: Some(false),
        })
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Blocked);

    let blocked = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(blocked.status, TaskStatus::Blocked);
    assert!(blocked
        .completion_notes
        .as_deref()
        .unwrap()
        .contains("prepare schema"));
    assert!(blocked.assigned_agent_id.is_none());
    assert!(blocked.queue_position.is_none());

    // The blocked ticket refuses status changes (invariant 2).
    let err = fx
        .app
        .ticket_service
        .change_status(ticket_x.id, "a1", "in_progress", "try", None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("blocked by 1 ticket(s)"));

    // Resolving Y drops it from X's blockers and queues the task.
    let resolve = fx
        .app
        .ticket_service
        .resolve(ticket_y.id, "a1", "schema ready", None)
        .await
        .unwrap();
    assert_eq!(resolve.unblocked_tickets, vec![ticket_x.id]);
    assert_eq!(resolve.unblocked_tasks, vec![task.id]);

    let ticket_x = fx.app.ticket_repo.get(ticket_x.id).await.unwrap().unwrap();
    assert!(ticket_x.blocked_by_ticket_ids.is_empty());

    let queued = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(queued.status, TaskStatus::Queued);
    assert!(queued.queued_at.is_some());

    // The next queue event spawns the agent.
    let started = fx.app.task_service.process_queue().await.unwrap();
    assert_eq!(started, 1);
    let running = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Assigned);
    assert!(running.assigned_agent_id.is_some());
}

#[tokio::test]
async fn sync_reconciles_queued_task_with_blocked_ticket() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 0).await;
    let workflow_id = workflow_with_board(&fx).await;

    let blocker = fx
        .app
        .ticket_service
        .create(ticket(workflow_id, "blocker", vec![]))
        .await
        .unwrap();
    let dependent = fx
        .app
        .ticket_service
        .create(ticket(workflow_id, "dependent", vec![]))
        .await
        .unwrap();

    // Task queues while its ticket is free.
    let (task, outcome) = fx
        .app
        .task_service
        .create_and_process(NewTask {
            description: "work on dependent".to_string(),
            done_definition: "done".to_string(),
            priority: TaskPriority::Medium,
            ticket_id: Some(dependent.id),
            phase_id: None,
            parent_task_id: None,
            created_by: Some("main-session-cli".to_string()),
            validation_enabled: Some(false),
        })
        .await
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Queued);

    // The ticket later gains a blocker; sync derives the blocked state.
    fx.app
        .ticket_service
        .set_blockers(dependent.id, "a1", vec![blocker.id])
        .await
        .unwrap();

    let report = fx.app.blocking.sync().await.unwrap();
    assert_eq!(report.tasks_blocked, 1);

    let task = fx.app.task_repo.get(task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.queue_position.is_none());
}

#[tokio::test]
async fn ticket_required_when_tracking_enabled() {
    let fx = common::build_app(|c| c.max_concurrent_agents = 0).await;
    workflow_with_board(&fx).await;

    // Agent-originated task without a ticket is refused.
    let err = fx
        .app
        .task_service
        .create_task(NewTask {
            description: "no ticket".to_string(),
            done_definition: "d".to_string(),
            priority: TaskPriority::Medium,
            ticket_id: None,
            phase_id: None,
            parent_task_id: None,
            created_by: Some("agent-7f3a".to_string()),
            validation_enabled: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Ticket tracking is enabled"));

    // The monitor and main-session callers stay exempt.
    fx.app
        .task_service
        .create_task(NewTask {
            description: "monitor task".to_string(),
            done_definition: "d".to_string(),
            priority: TaskPriority::Medium,
            ticket_id: None,
            phase_id: None,
            parent_task_id: None,
            created_by: Some("monitor".to_string()),
            validation_enabled: None,
        })
        .await
        .unwrap();
}
